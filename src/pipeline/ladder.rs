//! The strategy ladder: try strategies in order until one produces a valid PDF.
//!
//! ```text
//! Pending ──▶ Attempting(1) ──▶ Attempting(2) ──▶ … ──▶ Exhausted
//!                  │                 │
//!                  ▼                 ▼
//!             Success(1)        Success(2)
//! ```
//!
//! Each strategy runs exactly once, in its own attempt directory. Failures are
//! recorded and the ladder moves on; only cancellation stops it early. The
//! winner's output stays staged in the workspace and is promoted by the caller.

use crate::cancel::CancelToken;
use crate::config::CompressionProfile;
use crate::error::AttemptError;
use crate::output::AttemptRecord;
use crate::pipeline::builtin::{self, BuiltinParams};
use crate::pipeline::invoke::ToolCommand;
use crate::pipeline::strategy::{expand_args, OutputKind, Step, Strategy, TemplateVars};
use crate::pipeline::workspace::JobWorkspace;
use crate::progress::JobProgressCallback;
use pdftool_probe::ToolRegistry;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ── Job state ────────────────────────────────────────────────────────────

/// Where a job is on its ladder. Indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Attempting(usize),
    Success(usize),
    Exhausted,
}

impl JobState {
    /// Move to the first strategy, or straight to `Exhausted` for an empty ladder.
    pub fn start(self, total: usize) -> JobState {
        match self {
            JobState::Pending if total > 0 => JobState::Attempting(1),
            JobState::Pending => JobState::Exhausted,
            other => other,
        }
    }

    /// Record the outcome of the current attempt.
    pub fn finish_attempt(self, succeeded: bool, total: usize) -> JobState {
        match self {
            JobState::Attempting(i) if succeeded => JobState::Success(i),
            JobState::Attempting(i) if i < total => JobState::Attempting(i + 1),
            JobState::Attempting(_) => JobState::Exhausted,
            other => other,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success(_) | JobState::Exhausted)
    }
}

// ── Context & results ────────────────────────────────────────────────────

/// Everything one ladder run needs.
pub struct LadderContext<'a> {
    pub job_id: usize,
    /// Job input, absolute.
    pub input: &'a Path,
    pub profile: &'a CompressionProfile,
    pub tools: &'a ToolRegistry,
    pub workspace: &'a JobWorkspace,
    /// Timeout of strategies that don't set their own.
    pub default_timeout: Duration,
    pub cancel: &'a CancelToken,
    pub progress: Option<&'a dyn JobProgressCallback>,
    /// Require `%PDF` header and `%%EOF` trailer on the final output.
    pub validate_output: bool,
}

/// The first strategy that produced a valid output.
#[derive(Debug)]
pub struct LadderSuccess {
    pub strategy: String,
    /// Output inside the workspace, ready to be promoted.
    pub staged: PathBuf,
    /// Every attempt, the winner last.
    pub attempts: Vec<AttemptRecord>,
}

/// Why no output was produced.
#[derive(Debug)]
pub enum LadderFailure {
    /// Every strategy was attempted and failed.
    Exhausted(Vec<AttemptRecord>),
    /// The cancel token fired; later strategies were not attempted.
    Cancelled(Vec<AttemptRecord>),
}

/// What one attempt produced before it is turned into a record.
struct AttemptRun {
    result: Result<PathBuf, AttemptError>,
    exit_code: Option<i32>,
    diagnostics: Vec<String>,
}

impl AttemptRun {
    fn new() -> Self {
        Self {
            result: Err(AttemptError::Cancelled),
            exit_code: None,
            diagnostics: Vec::new(),
        }
    }

    fn fail(mut self, error: AttemptError) -> Self {
        self.result = Err(error);
        self
    }
}

// ── Ladder ───────────────────────────────────────────────────────────────

/// Attempt `strategies` in order.
pub async fn run_ladder(
    strategies: &[&Strategy],
    ctx: &LadderContext<'_>,
) -> Result<LadderSuccess, LadderFailure> {
    let total = strategies.len();
    let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(total);
    let mut state = JobState::Pending.start(total);

    while let JobState::Attempting(index) = state {
        let strategy = strategies[index - 1];

        if ctx.cancel.is_cancelled() {
            debug!("Job {}: cancelled before {}", ctx.job_id, strategy.name);
            return Err(LadderFailure::Cancelled(attempts));
        }

        info!(
            "Job {}: trying {} ({}/{})",
            ctx.job_id, strategy.name, index, total
        );
        if let Some(cb) = ctx.progress {
            cb.on_attempt_start(ctx.job_id, &strategy.name, index, total);
        }

        let started = Instant::now();
        let (run, attempt_dir) = run_strategy(strategy, index, ctx).await;
        let error = run.result.as_ref().err().cloned();
        let mut diagnostics = run.diagnostics.join("\n");
        if let (Some(e), true) = (&error, diagnostics.is_empty()) {
            diagnostics = e.to_string();
        }
        attempts.push(AttemptRecord {
            index,
            strategy: strategy.name.clone(),
            error: error.clone(),
            exit_code: run.exit_code,
            diagnostics,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        match run.result {
            Ok(staged) => {
                info!(
                    "Job {}: {} succeeded in {:.1}s",
                    ctx.job_id,
                    strategy.name,
                    started.elapsed().as_secs_f64()
                );
                state = state.finish_attempt(true, total);
                debug!("Job {}: {:?}", ctx.job_id, state);
                return Ok(LadderSuccess {
                    strategy: strategy.name.clone(),
                    staged,
                    attempts,
                });
            }
            Err(e) => {
                if let Some(dir) = &attempt_dir {
                    ctx.workspace.discard(dir);
                }
                if e.is_cancellation() {
                    return Err(LadderFailure::Cancelled(attempts));
                }
                warn!("Job {}: {} failed: {}", ctx.job_id, strategy.name, e);
                if let Some(cb) = ctx.progress {
                    cb.on_attempt_failed(ctx.job_id, &strategy.name, &e);
                }
                state = state.finish_attempt(false, total);
            }
        }
    }

    debug!("Job {}: {:?}", ctx.job_id, state);
    Err(LadderFailure::Exhausted(attempts))
}

/// Run every step of one strategy. Returns the attempt directory when one was
/// created, so the caller can discard it on failure.
async fn run_strategy(
    strategy: &Strategy,
    index: usize,
    ctx: &LadderContext<'_>,
) -> (AttemptRun, Option<PathBuf>) {
    let run = AttemptRun::new();

    // Missing tools fail the attempt before anything is spawned.
    if let Some(tool) = strategy
        .required_tools()
        .into_iter()
        .find(|t| !ctx.tools.is_available(*t))
    {
        let mut run = run.fail(AttemptError::ToolNotAvailable { tool });
        run.diagnostics.push(format!("{tool}: tool not found"));
        return (run, None);
    }

    let dir = match ctx.workspace.attempt_dir(index, &strategy.name) {
        Ok(dir) => dir,
        Err(e) => {
            let detail = format!("cannot create attempt directory: {e}");
            return (run.fail(AttemptError::Io { detail }), None);
        }
    };

    let budget = strategy
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(ctx.default_timeout);
    let run = run_steps(strategy, &dir, budget, ctx).await;
    (run, Some(dir))
}

async fn run_steps(
    strategy: &Strategy,
    dir: &Path,
    budget: Duration,
    ctx: &LadderContext<'_>,
) -> AttemptRun {
    let mut run = AttemptRun::new();
    let deadline = Instant::now() + budget;
    let timeout = || AttemptError::Timeout {
        secs: budget.as_secs(),
    };
    let params = BuiltinParams {
        quality: ctx.profile.quality,
        dpi: ctx.profile.resolution,
        image_scale: ctx.profile.image_scale,
    };

    let mut current = ctx.input.to_path_buf();
    for (i, step) in strategy.steps.iter().enumerate() {
        let n = i + 1;
        let output = dir.join(step.output_kind().file_name(n));
        if step.output_kind() == OutputKind::Directory {
            if let Err(e) = std::fs::create_dir_all(&output) {
                let detail = format!("cannot create {}: {e}", output.display());
                return run.fail(AttemptError::Io { detail });
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return run.fail(timeout());
        }

        match step {
            Step::Tool {
                tool,
                args,
                success_codes,
                ..
            } => {
                let Some(info) = ctx.tools.get(*tool) else {
                    return run.fail(AttemptError::ToolNotAvailable { tool: *tool });
                };
                let vars = TemplateVars {
                    input: &current,
                    output: &output,
                    workdir: dir,
                    dpi: ctx.profile.resolution,
                    quality: ctx.profile.quality,
                };
                let mut cmd = ToolCommand::new(&info.path)
                    .tool(*tool)
                    .args(expand_args(args, &vars))
                    .current_dir(dir)
                    .timeout(remaining);
                if let Some(codes) = success_codes {
                    cmd = cmd.success_codes(codes);
                }

                let result = cmd.run(ctx.cancel).await;
                run.exit_code = result.exit_code;
                if !result.diagnostics.is_empty() {
                    run.diagnostics
                        .push(format!("[step {n}: {}] {}", step.label(), result.diagnostics));
                }
                match result.outcome {
                    Ok(()) => {}
                    Err(AttemptError::Timeout { .. }) => return run.fail(timeout()),
                    Err(e) => return run.fail(e),
                }
                if step.output_kind() != OutputKind::Directory && !output.exists() {
                    return run.fail(AttemptError::InvalidOutput {
                        detail: format!("step {n} ({}) wrote no output", step.label()),
                    });
                }
            }
            Step::Builtin { op } => {
                let work = tokio::time::timeout(
                    remaining,
                    builtin::run(*op, &current, &output, params),
                );
                tokio::select! {
                    res = work => match res {
                        Err(_) => return run.fail(timeout()),
                        Ok(Err(detail)) => {
                            run.diagnostics.push(format!("[step {n}: {op}] {detail}"));
                            return run.fail(AttemptError::Builtin { op: *op, detail });
                        }
                        Ok(Ok(summary)) => {
                            run.diagnostics.push(format!("[step {n}: {op}] {summary}"));
                        }
                    },
                    _ = ctx.cancel.cancelled() => return run.fail(AttemptError::Cancelled),
                }
            }
        }
        current = output;
    }

    if ctx.validate_output {
        if let Err(detail) = builtin::validate_pdf(&current) {
            return run.fail(AttemptError::InvalidOutput { detail });
        }
    } else if !current.is_file() {
        return run.fail(AttemptError::InvalidOutput {
            detail: "no output file was produced".into(),
        });
    }

    run.result = Ok(current);
    run
}
