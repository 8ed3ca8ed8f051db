//! Ladder behaviour against scripted stand-ins for the external tools.
//!
//! Every tool kind is mapped to `/bin/sh`, and each step runs a small script
//! that appends the strategy name to a log, then succeeds, fails or misbehaves
//! as told. This exercises the real invoker, workspace and façade without
//! Ghostscript, qpdf or Poppler installed.

#![cfg(unix)]

use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use roto_pdf::{
    compress, compress_batch, prepare_document, prepare_merged, AttemptError, CancelToken, CompressionProfile,
    FailureKind, Goal, Job, JobProgressCallback, Ladder, LadderSet, RotoError, RunConfig, Step,
    Strategy, StrategyCache, ToolKind, ToolRegistry,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// ── Harness ──────────────────────────────────────────────────────────────────

const SCRIPT: &str = r#"name="$1"; mode="$2"; in="$3"; out="$4"
echo "$name" >> "$(dirname "$0")/calls.log"
case "$mode" in
  ok) cp "$in" "$out" ;;
  fail) echo "Error: /rangecheck in --setpagedevice--" >&2; exit 1 ;;
  sniff) cp "$in" "$out"; echo "Unrecoverable error, exit code 1" >&2 ;;
  garbage) echo "garbage" > "$out" ;;
  slow) exec sleep 10 ;;
esac
"#;

struct Harness {
    dir: tempfile::TempDir,
    script: PathBuf,
    input: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-tool.sh");
        std::fs::write(&script, SCRIPT).unwrap();
        let input = dir.path().join("brochure.pdf");
        write_pdf(&input);
        Self { dir, script, input }
    }

    fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join("out").join(name)
    }

    fn step(&self, tool: ToolKind, name: &str, mode: &str) -> Step {
        let script = self.script.to_string_lossy().into_owned();
        Step::tool(tool, &[&script, name, mode, "{input}", "{output}"])
    }

    fn strategy(&self, tool: ToolKind, name: &str, mode: &str) -> Strategy {
        Strategy::new(name, vec![self.step(tool, name, mode)])
    }

    /// The four flatten rungs with the given behaviours.
    fn flatten_ladder(&self, modes: [&str; 4]) -> Ladder {
        Ladder::new(vec![
            self.strategy(ToolKind::Ghostscript, "Standard", modes[0]),
            self.strategy(ToolKind::Ghostscript, "MinimalDirect", modes[1]),
            Strategy::new(
                "RebuildThenMinimal",
                vec![
                    self.step(ToolKind::Qpdf, "RebuildThenMinimal", "ok"),
                    self.step(ToolKind::Ghostscript, "RebuildThenMinimal", modes[2]),
                ],
            ),
            self.strategy(ToolKind::Pdftops, "ConvertThenMinimal", modes[3]),
        ])
    }

    fn config(&self, ladder: Ladder) -> RunConfig {
        self.builder(ladder).build().unwrap()
    }

    fn builder(&self, ladder: Ladder) -> roto_pdf::RunConfigBuilder {
        RunConfig::builder()
            .tools(all_tools())
            .ladders(LadderSet::builtin().with_ladder(Goal::FlattenTransparency, ladder))
            .strategy_timeout_secs(20)
    }

    /// Strategy names in the order the fake tool was invoked.
    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn reset_calls(&self) {
        let _ = std::fs::remove_file(self.dir.path().join("calls.log"));
    }
}

fn all_tools() -> ToolRegistry {
    ToolKind::ALL
        .into_iter()
        .fold(ToolRegistry::empty(), |r, k| r.with_tool(k, "/bin/sh", Some("test")))
}

/// A one-page 200×200 pt PDF with a MediaBox only.
fn write_pdf(path: &Path) {
    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), b"0 0 m 10 10 l S".to_vec()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(200), Object::Integer(200)],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => Object::Integer(1),
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl JobProgressCallback for Recorder {
    fn on_job_start(&self, job_id: usize, _input: &Path, goal: Goal) {
        self.events.lock().unwrap().push(format!("start {job_id} {goal}"));
    }
    fn on_attempt_start(&self, job_id: usize, strategy: &str, index: usize, total: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("try {job_id} {strategy} {index}/{total}"));
    }
    fn on_attempt_failed(&self, job_id: usize, strategy: &str, _error: &AttemptError) {
        self.events.lock().unwrap().push(format!("failed {job_id} {strategy}"));
    }
    fn on_job_complete(&self, job_id: usize, strategy_used: &str, _output: &Path) {
        self.events.lock().unwrap().push(format!("done {job_id} {strategy_used}"));
    }
    fn on_job_failed(&self, job_id: usize, _error: &str) {
        self.events.lock().unwrap().push(format!("gave up {job_id}"));
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_failure_falls_back_to_minimal_direct() {
    let h = Harness::new();
    let out = h.output("flat.pdf");
    let config = h.config(h.flatten_ladder(["fail", "ok", "ok", "ok"]));

    let outcome = compress(&h.input, &out, &CompressionProfile::flatten(), &config)
        .await
        .unwrap();

    assert_eq!(outcome.strategy_used, "MinimalDirect");
    assert_eq!(h.calls(), vec!["Standard", "MinimalDirect"]);
    assert_eq!(outcome.attempts.len(), 2);
    let first = &outcome.attempts[0];
    assert_eq!(first.strategy, "Standard");
    assert!(first.diagnostics.contains("rangecheck"));
    assert!(matches!(
        first.error,
        Some(AttemptError::StrategyFailed {
            failure: FailureKind::RangeCheck,
            exit_code: Some(1),
            ..
        })
    ));
    assert_eq!(std::fs::read(&out).unwrap(), std::fs::read(&h.input).unwrap());
}

#[tokio::test]
async fn all_failing_is_exhausted_and_leaves_nothing() {
    let h = Harness::new();
    let out = h.output("flat.pdf");
    std::fs::create_dir_all(out.parent().unwrap()).unwrap();
    std::fs::write(&out, b"stale output from an earlier run").unwrap();
    let config = h.config(h.flatten_ladder(["fail", "fail", "fail", "fail"]));

    let err = compress(&h.input, &out, &CompressionProfile::flatten(), &config)
        .await
        .unwrap_err();

    match &err {
        RotoError::AllStrategiesExhausted { goal, attempts } => {
            assert_eq!(*goal, Goal::FlattenTransparency);
            assert_eq!(attempts.len(), 4);
        }
        other => panic!("unexpected: {other}"),
    }
    let names: Vec<&str> = err.attempted_strategies().iter().map(|(n, _)| *n).collect();
    assert_eq!(
        names,
        vec!["Standard", "MinimalDirect", "RebuildThenMinimal", "ConvertThenMinimal"]
    );
    assert!(err.to_string().contains("ConvertThenMinimal"));
    assert!(!out.exists());
    assert_eq!(h.calls().len(), 5, "RebuildThenMinimal runs two steps");
}

#[tokio::test]
async fn missing_tool_is_skipped_without_spawning() {
    let h = Harness::new();
    let out = h.output("flat.pdf");
    let tools = ToolRegistry::empty().with_tool(ToolKind::Qpdf, "/bin/sh", None);
    let ladder = Ladder::new(vec![
        h.strategy(ToolKind::Ghostscript, "Standard", "ok"),
        h.strategy(ToolKind::Qpdf, "QpdfOnly", "ok"),
    ]);
    let config = h.builder(ladder).tools(tools).build().unwrap();

    let outcome = compress(&h.input, &out, &CompressionProfile::flatten(), &config)
        .await
        .unwrap();

    assert_eq!(outcome.strategy_used, "QpdfOnly");
    assert_eq!(h.calls(), vec!["QpdfOnly"]);
    assert_eq!(
        outcome.attempts[0].error,
        Some(AttemptError::ToolNotAvailable {
            tool: ToolKind::Ghostscript
        })
    );
}

#[tokio::test]
async fn missing_input_makes_no_attempt() {
    let h = Harness::new();
    let recorder = Arc::new(Recorder::default());
    let config = h
        .builder(h.flatten_ladder(["ok", "ok", "ok", "ok"]))
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    let err = compress(
        h.dir.path().join("nope.pdf"),
        h.output("x.pdf"),
        &CompressionProfile::flatten(),
        &config,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, RotoError::InputNotFound { .. }));
    assert!(err.attempts().is_empty());
    assert!(h.calls().is_empty());
    assert_eq!(*recorder.events.lock().unwrap(), vec!["gave up 0"]);
}

#[tokio::test]
async fn zero_exit_with_fatal_diagnostic_is_a_failure() {
    let h = Harness::new();
    let config = h.config(h.flatten_ladder(["sniff", "ok", "ok", "ok"]));
    let outcome = compress(&h.input, h.output("f.pdf"), &CompressionProfile::flatten(), &config)
        .await
        .unwrap();
    assert_eq!(outcome.strategy_used, "MinimalDirect");
    assert!(matches!(
        outcome.attempts[0].error,
        Some(AttemptError::StrategyFailed {
            failure: FailureKind::Unrecoverable,
            exit_code: Some(0),
            ..
        })
    ));
}

#[tokio::test]
async fn invalid_output_advances_the_ladder() {
    let h = Harness::new();
    let config = h.config(h.flatten_ladder(["garbage", "garbage", "ok", "ok"]));
    let outcome = compress(&h.input, h.output("f.pdf"), &CompressionProfile::flatten(), &config)
        .await
        .unwrap();
    assert_eq!(outcome.strategy_used, "RebuildThenMinimal");
    assert!(matches!(
        outcome.attempts[0].error,
        Some(AttemptError::InvalidOutput { .. })
    ));
    assert_eq!(outcome.attempts.len(), 3);
}

#[tokio::test]
async fn same_inputs_pick_the_same_winner() {
    let h = Harness::new();
    let config = h.config(h.flatten_ladder(["fail", "fail", "ok", "ok"]));
    let mut winners = Vec::new();
    for i in 0..3 {
        let o = compress(
            &h.input,
            h.output(&format!("f{i}.pdf")),
            &CompressionProfile::flatten(),
            &config,
        )
        .await
        .unwrap();
        winners.push(o.strategy_used);
    }
    assert!(winners.iter().all(|w| w == "RebuildThenMinimal"));
}

#[tokio::test]
async fn slow_strategy_times_out_then_next_wins() {
    let h = Harness::new();
    let ladder = Ladder::new(vec![
        h.strategy(ToolKind::Ghostscript, "Slow", "slow").with_timeout_secs(1),
        h.strategy(ToolKind::Ghostscript, "Quick", "ok"),
    ]);
    let config = h.config(ladder);
    let started = Instant::now();
    let outcome = compress(&h.input, h.output("f.pdf"), &CompressionProfile::flatten(), &config)
        .await
        .unwrap();
    assert_eq!(outcome.strategy_used, "Quick");
    assert_eq!(outcome.attempts[0].error, Some(AttemptError::Timeout { secs: 1 }));
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[tokio::test]
async fn cancellation_stops_the_ladder() {
    let h = Harness::new();
    let out = h.output("f.pdf");
    let token = CancelToken::new();
    let ladder = Ladder::new(vec![
        h.strategy(ToolKind::Ghostscript, "Slow", "slow"),
        h.strategy(ToolKind::Ghostscript, "Quick", "ok"),
    ]);
    let config = h.builder(ladder).cancel_token(token.clone()).build().unwrap();

    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = compress(&h.input, &out, &CompressionProfile::flatten(), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, RotoError::Cancelled { .. }));
    assert_eq!(err.attempts().len(), 1);
    assert_eq!(h.calls(), vec!["Slow"]);
    assert!(!out.exists());
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[tokio::test]
async fn cached_winner_goes_first_only_when_asked() {
    let h = Harness::new();
    let cache = Arc::new(StrategyCache::in_memory());
    let ladder = h.flatten_ladder(["fail", "ok", "ok", "ok"]);

    let plain = h.builder(ladder.clone()).cache(cache.clone()).build().unwrap();
    compress(&h.input, h.output("a.pdf"), &CompressionProfile::flatten(), &plain)
        .await
        .unwrap();
    assert_eq!(h.calls(), vec!["Standard", "MinimalDirect"]);
    assert_eq!(cache.len(), 1);

    // Without the preference the fixed order holds.
    h.reset_calls();
    compress(&h.input, h.output("b.pdf"), &CompressionProfile::flatten(), &plain)
        .await
        .unwrap();
    assert_eq!(h.calls(), vec!["Standard", "MinimalDirect"]);

    h.reset_calls();
    let preferring = h
        .builder(ladder)
        .cache(cache.clone())
        .prefer_cached_strategy(true)
        .build()
        .unwrap();
    let o = compress(&h.input, h.output("c.pdf"), &CompressionProfile::flatten(), &preferring)
        .await
        .unwrap();
    assert_eq!(o.strategy_used, "MinimalDirect");
    assert_eq!(h.calls(), vec!["MinimalDirect"]);
}

#[tokio::test]
async fn progress_events_follow_the_ladder() {
    let h = Harness::new();
    let recorder = Arc::new(Recorder::default());
    let config = h
        .builder(h.flatten_ladder(["fail", "ok", "ok", "ok"]))
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    compress(&h.input, h.output("f.pdf"), &CompressionProfile::flatten(), &config)
        .await
        .unwrap();
    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "start 0 flatten_transparency",
            "try 0 Standard 1/4",
            "failed 0 Standard",
            "try 0 MinimalDirect 2/4",
            "done 0 MinimalDirect",
        ]
    );
}

#[tokio::test]
async fn batch_jobs_are_independent() {
    let h = Harness::new();
    let config = h.builder(h.flatten_ladder(["ok", "ok", "ok", "ok"])).concurrency(2).build().unwrap();
    let jobs = vec![
        Job::new(0, &h.input, h.output("0.pdf"), CompressionProfile::flatten()),
        Job::new(1, h.dir.path().join("missing.pdf"), h.output("1.pdf"), CompressionProfile::flatten()),
        Job::new(2, &h.input, h.output("2.pdf"), CompressionProfile::flatten()),
    ];
    let reports = compress_batch(&jobs, &config).await;
    let ids: Vec<usize> = reports.iter().map(|r| r.job_id).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert!(reports[0].is_success());
    assert!(!reports[1].is_success());
    assert!(reports[2].is_success());
    assert!(h.output("2.pdf").exists());
}

#[tokio::test]
async fn prepare_document_trims_then_writes_variants() {
    let h = Harness::new();
    let out_dir = h.dir.path().join("dist");
    let config = h.config(h.flatten_ladder(["ok", "ok", "ok", "ok"]));
    let light = CompressionProfile::builder("web")
        .flatten_transparency(true)
        .build()
        .unwrap();

    let report = prepare_document(
        &h.input,
        &out_dir,
        &[CompressionProfile::flatten(), light],
        &config,
    )
    .await
    .unwrap();

    assert_eq!(report.cleaned.as_deref(), Some(out_dir.join("brochure-net.pdf").as_path()));
    assert_eq!(report.trims.len(), 1);
    assert!(report.all_succeeded());
    assert!(out_dir.join("brochure-net-flatten.pdf").exists());
    assert!(out_dir.join("brochure-net-web.pdf").exists());

    // The variants were made from the trimmed copy.
    let trimmed = roto_pdf::inspect(out_dir.join("brochure-net-web.pdf")).await.unwrap();
    let media = trimmed.pages[0].media_box.unwrap();
    assert!(media.width() < 200.0);
}

#[tokio::test]
async fn merged_inputs_become_one_document() {
    let h = Harness::new();
    let back = h.dir.path().join("back.pdf");
    write_pdf(&back);
    let out_dir = h.dir.path().join("dist");
    let config = h.config(h.flatten_ladder(["ok", "ok", "ok", "ok"]));

    let report = prepare_merged(
        &[h.input.clone(), back.clone()],
        "catalogue",
        &out_dir,
        &[CompressionProfile::flatten()],
        &config,
    )
    .await
    .unwrap();

    assert_eq!(report.merged_from.len(), 2);
    assert!(report.source.ends_with("catalogue.pdf"));
    assert_eq!(report.trims.len(), 2);
    assert!(report.all_succeeded());

    let variant = roto_pdf::inspect(out_dir.join("catalogue-net-flatten.pdf")).await.unwrap();
    assert_eq!(variant.page_count, 2);
}

#[tokio::test]
async fn merge_checks_every_input_before_writing() {
    let h = Harness::new();
    let out_dir = h.dir.path().join("dist");
    let config = h.config(h.flatten_ladder(["ok", "ok", "ok", "ok"]));
    let missing = h.dir.path().join("missing.pdf");

    let err = prepare_merged(
        &[h.input.clone(), missing],
        "catalogue",
        &out_dir,
        &[CompressionProfile::flatten()],
        &config,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RotoError::InputNotFound { .. }), "{err}");
    assert!(!out_dir.join("catalogue.pdf").exists());

    let err = prepare_merged(
        &[h.input.clone()],
        "../up",
        &out_dir,
        &[CompressionProfile::flatten()],
        &config,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, RotoError::InvalidConfig(_)));
    assert!(h.calls().is_empty());
}
