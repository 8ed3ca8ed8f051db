//! End-to-end tests against the PDF tools installed on this machine.
//!
//! They run the built-in ladders with real Ghostscript, qpdf and Poppler
//! binaries, so they are gated behind the `ROTO_E2E` environment variable
//! and skip themselves when a needed tool is missing.
//!
//! Run with:
//!   ROTO_E2E=1 cargo test --test e2e -- --nocapture
//!
//! Put extra PDFs in `./test_cases/` to have them pushed through every goal.

use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use roto_pdf::{
    compress, inspect, prepare_document, CompressionProfile, Goal, RunConfig, ToolKind,
    ToolRegistry,
};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip unless `ROTO_E2E` is set and every listed tool is installed.
macro_rules! e2e_skip_unless_ready {
    ($($tool:expr),* $(,)?) => {{
        if std::env::var("ROTO_E2E").is_err() {
            println!("SKIP: set ROTO_E2E=1 to run e2e tests");
            return;
        }
        let tools = ToolRegistry::detect();
        $(
            if !tools.is_available($tool) {
                println!("SKIP: {} is not installed", $tool);
                return;
            }
        )*
        tools
    }};
}

fn config(tools: ToolRegistry) -> RunConfig {
    RunConfig::builder()
        .tools(tools)
        .strategy_timeout_secs(120)
        .build()
        .unwrap()
}

/// Two A5 pages with 3 mm bleed, a TrimBox on the first page only and a
/// half-transparent rectangle on each.
fn write_sample(path: &Path) {
    let mut doc = Document::with_version("1.6");
    let pages_id = doc.new_object_id();
    let gs_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => Object::Real(0.5),
        "CA" => Object::Real(0.5),
    });
    let resources_id = doc.add_object(dictionary! {
        "ExtGState" => dictionary! { "GS1" => gs_id },
    });

    let bleed: f32 = 8.5;
    let media = vec![
        Object::Integer(0),
        Object::Integer(0),
        Object::Real(419.53 + 2.0 * bleed),
        Object::Real(595.28 + 2.0 * bleed),
    ];
    let trim = vec![
        Object::Real(bleed),
        Object::Real(bleed),
        Object::Real(419.53 + bleed),
        Object::Real(595.28 + bleed),
    ];

    let mut kids = Vec::new();
    for n in 0..2 {
        let content = format!("/GS1 gs 1 0 0 rg 50 50 300 {} re f", 200 + 100 * n);
        let content_id =
            doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        };
        if n == 0 {
            page.set("TrimBox", trim.clone());
        }
        kids.push(doc.add_object(page).into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(2),
            "MediaBox" => media,
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

fn assert_pdf(path: &Path) {
    let bytes = std::fs::read(path).unwrap();
    assert!(bytes.starts_with(b"%PDF-"), "{} lacks a PDF header", path.display());
    Document::load(path).unwrap_or_else(|e| panic!("{} does not parse: {e}", path.display()));
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn e2e_detects_installed_tools() {
    let tools = e2e_skip_unless_ready!();
    for info in tools.iter() {
        println!("{:<11} {} ({})", info.kind, info.path.display(), info.version_or_unknown());
        assert!(info.path.is_absolute() || info.path.exists());
    }
}

#[tokio::test]
async fn e2e_flatten_produces_valid_pdf() {
    let tools = e2e_skip_unless_ready!(ToolKind::Ghostscript);
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.pdf");
    write_sample(&input);
    let out = dir.path().join("flat.pdf");

    let outcome = compress(&input, &out, &CompressionProfile::flatten(), &config(tools))
        .await
        .unwrap();
    println!("flatten: {} after {} attempt(s)", outcome.strategy_used, outcome.attempts.len());

    assert_eq!(outcome.goal, Goal::FlattenTransparency);
    assert_pdf(&out);
    let info = inspect(&out).await.unwrap();
    assert_eq!(info.page_count, 2);
}

#[tokio::test]
async fn e2e_vector_compress_keeps_page_count() {
    let tools = e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.pdf");
    write_sample(&input);

    for profile in [CompressionProfile::hq(), CompressionProfile::light()] {
        let out = dir.path().join(format!("{}.pdf", profile.name));
        let outcome = compress(&input, &out, &profile, &config(tools.clone()))
            .await
            .unwrap();
        println!(
            "{}: {} ({:.0}% of input)",
            profile.name,
            outcome.strategy_used,
            outcome.size_ratio() * 100.0
        );
        assert_pdf(&out);
        assert_eq!(inspect(&out).await.unwrap().page_count, 2);
    }
}

#[tokio::test]
async fn e2e_raster_compress() {
    let tools = e2e_skip_unless_ready!(ToolKind::Pdftoppm);
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.pdf");
    write_sample(&input);
    let out = dir.path().join("raster.pdf");

    let outcome = compress(&input, &out, &CompressionProfile::raster(), &config(tools))
        .await
        .unwrap();
    assert_eq!(outcome.goal, Goal::RasterCompress);
    assert_pdf(&out);
    assert_eq!(inspect(&out).await.unwrap().page_count, 2);
}

#[tokio::test]
async fn e2e_prepare_document_trims_bleed() {
    let tools = e2e_skip_unless_ready!(ToolKind::Ghostscript);
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("sample.pdf");
    write_sample(&input);
    let out_dir = dir.path().join("dist");

    let report = prepare_document(
        &input,
        &out_dir,
        &[CompressionProfile::hq(), CompressionProfile::light()],
        &config(tools),
    )
    .await
    .unwrap();

    assert!(report.all_succeeded(), "{:?}", report.variants);
    let cleaned = report.cleaned.unwrap();
    let info = inspect(&cleaned).await.unwrap();
    for page in &info.pages {
        let media = page.media_box.unwrap();
        assert!((media.width() - 419.53).abs() < 0.5, "page {} width {}", page.page, media.width());
    }
    assert!(out_dir.join("sample-net-hq.pdf").exists());
    assert!(out_dir.join("sample-net-light.pdf").exists());
}

#[tokio::test]
async fn e2e_test_cases_through_every_goal() {
    let tools = e2e_skip_unless_ready!(ToolKind::Ghostscript, ToolKind::Qpdf);
    let Ok(entries) = std::fs::read_dir(test_cases_dir()) else {
        println!("SKIP: no test_cases directory");
        return;
    };
    let out_dir = tempfile::tempdir().unwrap();
    let config = config(tools);

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pdf") {
            continue;
        }
        for profile in [
            CompressionProfile::flatten(),
            CompressionProfile::hq(),
            CompressionProfile::raster(),
        ] {
            let name = path.file_stem().unwrap().to_string_lossy();
            let out = out_dir.path().join(format!("{name}-{}.pdf", profile.name));
            match compress(&path, &out, &profile, &config).await {
                Ok(o) => {
                    println!("{name} [{}]: {}", profile.name, o.strategy_used);
                    assert_pdf(&out);
                }
                Err(e) => {
                    // A hopeless input may exhaust a ladder, but must never leave output.
                    println!("{name} [{}]: {e}", profile.name);
                    assert!(!out.exists());
                }
            }
        }
    }
}
