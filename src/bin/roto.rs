//! CLI binary for roto-pdf.
//!
//! A thin shim over the library crate that maps CLI flags to `RunConfig`
//! and profiles, runs `prepare_document` per input (or `prepare_merged` over
//! all of them) and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use roto_pdf::{
    inspect, prepare_document, prepare_merged, AttemptError, CancelToken, CompressionProfile, DocumentReport,
    JobProgressCallback, LadderSet, ProgressCallback, RunConfig, StrategyCache,
    ToolRegistry,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per document, counting finished variants. Strategy fallbacks are
/// printed above the bar as they happen.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new(document: &str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos}/{len} variants  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix(document.to_string());
        bar.set_message("trimming…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_jobs: usize) {
        self.bar.set_length(total_jobs as u64);
        self.bar.set_message("");
    }

    fn on_attempt_start(&self, job_id: usize, strategy: &str, index: usize, total: usize) {
        self.bar
            .set_message(format!("job {job_id}: {strategy} ({index}/{total})"));
    }

    fn on_attempt_failed(&self, job_id: usize, strategy: &str, error: &AttemptError) {
        self.bar.println(format!(
            "  {} job {job_id}: {strategy} failed, falling back  {}",
            yellow("↻"),
            dim(&error.to_string())
        ));
    }

    fn on_job_complete(&self, _job_id: usize, strategy_used: &str, output: &Path) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✔"),
            output.display(),
            dim(strategy_used)
        ));
        self.bar.inc(1);
    }

    fn on_job_failed(&self, job_id: usize, error: &str) {
        let first_line = error.lines().next().unwrap_or(error);
        self.bar
            .println(format!("  {} job {job_id}: {}", red("✘"), first_line));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total_jobs: usize, _succeeded: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Trim bleed and write hq + light variants to ./output
  roto brochure.pdf

  # Several files, custom profiles, into another directory
  roto -o dist --profile hq --profile very-light *.pdf

  # Add a transparency-flattened copy for picky RIPs
  roto --flatten catalogue.pdf

  # One document from several files, written as output/catalogue*.pdf
  roto --merge catalogue cover.pdf pages.pdf back.pdf

  # Keep the bleed, only compress
  roto --no-clean flyer.pdf

  # Custom ladders and a shorter per-strategy timeout
  roto --ladders ladders.json --timeout 60 brochure.pdf

  # Which tools did roto find?
  roto --list-tools

  # Page boxes and basic facts, without writing anything
  roto --inspect-only brochure.pdf

PROFILES:
  hq          300 dpi, JPEG q80, vectors kept
  light       150 dpi, JPEG q50, vectors kept
  medium      150 dpi, JPEG q75, vectors kept
  very-light   96 dpi, JPEG q45, images halved
  raster      150 dpi, JPEG q60, every page rasterised
  flatten     300 dpi, PDF 1.3 rewrite, transparency flattened

ENVIRONMENT VARIABLES:
  ROTO_GS_PATH        Path to Ghostscript (gs)
  ROTO_QPDF_PATH      Path to qpdf
  ROTO_PDFTOPS_PATH   Path to Poppler pdftops
  ROTO_PDFTOPPM_PATH  Path to Poppler pdftoppm
  ROTO_CACHE_DIR      Directory of the strategy cache
  RUST_LOG            Log filter (overrides -v / -q)
"#;

/// Slim press-ready PDFs for distribution.
#[derive(Parser, Debug)]
#[command(
    name = "roto",
    version,
    about = "Slim press-ready PDFs for distribution",
    long_about = "Trim print bleed and produce compressed distribution copies of PDF files. \
Each transformation walks a ladder of Ghostscript, qpdf and Poppler strategies and keeps \
the first one that yields a valid PDF.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files to process.
    #[arg(required_unless_present = "list_tools")]
    inputs: Vec<PathBuf>,

    /// Directory for the produced files.
    #[arg(short = 'o', long, env = "ROTO_OUT_DIR", default_value = "output")]
    out_dir: PathBuf,

    /// Bleed removed when a page has no TrimBox, in millimetres.
    #[arg(long, env = "ROTO_BLEED_MM", default_value_t = 3.0)]
    bleed_mm: f64,

    /// Profile to produce (repeatable): hq, light, medium, very-light, raster, flatten.
    #[arg(
        long = "profile",
        env = "ROTO_PROFILES",
        value_delimiter = ',',
        default_values_t = vec!["hq".to_string(), "light".to_string()]
    )]
    profiles: Vec<String>,

    /// Also produce a transparency-flattened variant.
    #[arg(long, env = "ROTO_FLATTEN")]
    flatten: bool,

    /// Also produce a fully rasterised variant.
    #[arg(long, env = "ROTO_RASTER")]
    raster: bool,

    /// Concatenate all inputs, in order, into one document named LABEL.
    #[arg(long, env = "ROTO_MERGE", value_name = "LABEL")]
    merge: Option<String>,

    /// Keep the bleed: compress the input as it is.
    #[arg(long, env = "ROTO_NO_CLEAN")]
    no_clean: bool,

    /// JSON file replacing some or all of the built-in ladders.
    #[arg(long, env = "ROTO_LADDERS")]
    ladders: Option<PathBuf>,

    /// Time budget per strategy, in seconds.
    #[arg(long, env = "ROTO_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Variants processed at once.
    #[arg(short, long, env = "ROTO_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Remember winning strategies in the cache directory.
    #[arg(long, env = "ROTO_CACHE")]
    cache: bool,

    /// Try the remembered winner first (implies --cache).
    #[arg(long, env = "ROTO_PREFER_CACHED")]
    prefer_cached: bool,

    /// Print one JSON document per processed document instead of text.
    #[arg(long, env = "ROTO_JSON")]
    json: bool,

    /// List the external tools found on this machine and exit.
    #[arg(long)]
    list_tools: bool,

    /// Print page boxes and basic facts only.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "ROTO_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ROTO_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ROTO_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Tool listing ─────────────────────────────────────────────────────
    if cli.list_tools {
        let tools = tokio::task::spawn_blocking(ToolRegistry::global)
            .await
            .context("Tool detection failed")?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(tools)?);
        } else {
            for info in tools.iter() {
                println!(
                    "{} {:<12} {}  {}",
                    green("✔"),
                    info.kind,
                    info.version_or_unknown(),
                    dim(&info.path.display().to_string())
                );
            }
            for kind in tools.missing() {
                println!("{} {:<12} not found (set {})", red("✘"), kind, kind.env_override());
            }
        }
        return Ok(());
    }

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        for input in &cli.inputs {
            let info = inspect(input)
                .await
                .with_context(|| format!("Failed to inspect {}", input.display()))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                continue;
            }
            println!("{}", bold(&info.path.display().to_string()));
            println!("  PDF version: {}", info.pdf_version);
            println!("  Pages:       {}", info.page_count);
            println!("  Size:        {} bytes", info.file_size);
            println!("  Encrypted:   {}", info.encrypted);
            for p in &info.pages {
                let describe = |r: Option<roto_pdf::pipeline::trim::Rect>| match r {
                    Some(r) => format!("{:.1}×{:.1}", r.width(), r.height()),
                    None => "-".to_string(),
                };
                println!(
                    "  p{:<4} media {}  crop {}  bleed {}  trim {}",
                    p.page,
                    describe(p.media_box),
                    describe(p.crop_box),
                    describe(p.bleed_box),
                    describe(p.trim_box)
                );
            }
        }
        return Ok(());
    }

    // ── Prepare documents ────────────────────────────────────────────────
    let profiles = resolve_profiles(&cli)?;
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} interrupted, stopping running tools…", yellow("⚠"));
                cancel.cancel();
            }
        });
    }

    // With --merge every input feeds a single document.
    let documents: Vec<(String, &[PathBuf])> = match &cli.merge {
        Some(label) => vec![(format!("{label}.pdf"), cli.inputs.as_slice())],
        None => cli
            .inputs
            .iter()
            .map(|i| (i.display().to_string(), std::slice::from_ref(i)))
            .collect(),
    };

    let mut failed = 0usize;
    for (name, inputs) in &documents {
        let bar = show_progress.then(|| {
            let short = Path::new(name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            CliProgressCallback::new(&short)
        });
        let progress = bar.clone().map(|b| b as ProgressCallback);
        let config = build_config(&cli, progress, cancel.clone())?;

        let result = match &cli.merge {
            Some(label) => prepare_merged(*inputs, label, &cli.out_dir, &profiles, &config).await,
            None => prepare_document(&inputs[0], &cli.out_dir, &profiles, &config).await,
        };
        if let Some(b) = &bar {
            // Merge or trim failures end the document before any batch event.
            b.bar.finish_and_clear();
        }
        match result {
            Ok(report) => {
                if !report.all_succeeded() {
                    failed += 1;
                }
                print_report(&cli, &report)?;
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {e}", red("✘"), name);
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} documents had failures", documents.len());
    }
    Ok(())
}

/// Profiles from `--profile`, plus `--flatten` / `--raster`, deduplicated.
fn resolve_profiles(cli: &Cli) -> Result<Vec<CompressionProfile>> {
    let mut names: Vec<String> = cli.profiles.iter().map(|s| s.trim().to_string()).collect();
    if cli.flatten {
        names.push("flatten".into());
    }
    if cli.raster {
        names.push("raster".into());
    }

    let mut profiles: Vec<CompressionProfile> = Vec::new();
    for name in names.iter().filter(|n| !n.is_empty()) {
        let profile = CompressionProfile::preset(name).with_context(|| {
            format!(
                "Unknown profile '{name}'. Known: {}",
                roto_pdf::config::PRESET_NAMES.join(", ")
            )
        })?;
        if !profiles.iter().any(|p| p.name == profile.name) {
            profiles.push(profile);
        }
    }
    if profiles.is_empty() {
        bail!("No profile selected");
    }
    Ok(profiles)
}

/// Map CLI args to `RunConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    cancel: CancelToken,
) -> Result<RunConfig> {
    let mut builder = RunConfig::builder()
        .strategy_timeout_secs(cli.timeout)
        .concurrency(cli.concurrency)
        .bleed_mm(cli.bleed_mm)
        .trim_bleed(!cli.no_clean)
        .prefer_cached_strategy(cli.prefer_cached)
        .cancel_token(cancel);

    if let Some(path) = &cli.ladders {
        let ladders = LadderSet::from_json_file(path)
            .with_context(|| format!("Failed to load ladders from {}", path.display()))?;
        builder = builder.ladders(ladders);
    }
    if cli.cache || cli.prefer_cached {
        builder = builder.cache(Arc::new(StrategyCache::load(StrategyCache::default_path())));
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_report(cli: &Cli, report: &DocumentReport) -> Result<()> {
    if cli.json {
        let variants: Vec<_> = report.variants.iter().map(|v| v.summary()).collect();
        let doc = serde_json::json!({
            "source": report.source,
            "merged_from": report.merged_from,
            "cleaned": report.cleaned,
            "trims": report.trims,
            "variants": variants,
        });
        println!("{}", serde_json::to_string_pretty(&doc).context("Failed to serialise report")?);
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    eprintln!("{}", bold(&report.source.display().to_string()));
    if !report.merged_from.is_empty() {
        eprintln!(
            "  {} merged from {} files",
            green("✔"),
            report.merged_from.len()
        );
    }
    if let Some(cleaned) = &report.cleaned {
        eprintln!(
            "  {} {}  {}",
            green("✔"),
            cleaned.display(),
            dim(&format!("{} pages trimmed", report.trims.len()))
        );
    }
    for v in &report.variants {
        match &v.result {
            Ok(o) => {
                let note = if o.fell_back() {
                    format!("{} after {} attempts", o.strategy_used, o.attempts.len())
                } else {
                    o.strategy_used.clone()
                };
                eprintln!(
                    "  {} {}  {:.0}% of input  {}",
                    green("✔"),
                    o.output.display(),
                    o.size_ratio() * 100.0,
                    dim(&note)
                );
            }
            Err(e) => {
                eprintln!("  {} {} ({})", red("✘"), v.output.display(), v.profile);
                for line in e.to_string().lines() {
                    eprintln!("      {}", dim(line));
                }
                let missing_tool = e
                    .attempts()
                    .iter()
                    .any(|a| matches!(a.error, Some(AttemptError::ToolNotAvailable { .. })));
                if missing_tool {
                    eprintln!("      {}", dim("hint: run `roto --list-tools`"));
                }
            }
        }
    }
    Ok(())
}
