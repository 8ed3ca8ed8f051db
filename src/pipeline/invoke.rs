//! External tool invoker: run one command with a timeout and cancellation.
//!
//! A run never returns `Err`. Every outcome (accepted exit, rejected exit,
//! timeout, cancellation, spawn failure) is an [`InvocationResult`] whose
//! `outcome` the ladder turns into an attempt record.
//!
//! Children are started with `kill_on_drop(true)`: when the timeout or the
//! cancel branch of the `select!` wins, the wait future is dropped and the
//! child is killed with it.

use crate::cancel::CancelToken;
use crate::error::AttemptError;
use crate::pipeline::classify::{self, Classification, FailureKind};
use pdftool_probe::ToolKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

/// Diagnostics longer than this keep only their tail, where tools print the
/// actual error.
pub const MAX_DIAGNOSTIC_CHARS: usize = 8 * 1024;

/// Description of one external command.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    timeout: Duration,
    tool: Option<ToolKind>,
    success_codes: Vec<i32>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: Duration::from_secs(300),
            tool: None,
            success_codes: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tool kind used to pick classification patterns and default exit codes.
    pub fn tool(mut self, tool: ToolKind) -> Self {
        self.tool = Some(tool);
        self.success_codes = classify::default_success_codes(Some(tool)).to_vec();
        self
    }

    /// Replace the accepted exit codes.
    pub fn success_codes(mut self, codes: &[i32]) -> Self {
        self.success_codes = codes.to_vec();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Run the command to completion, timeout or cancellation.
    pub async fn run(&self, cancel: &CancelToken) -> InvocationResult {
        let started = Instant::now();

        if cancel.is_cancelled() {
            return InvocationResult::cancelled(started);
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        debug!("Running {} {}", self.program.display(), self.args.join(" "));

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return self.spawn_failure(e, started),
        };

        tokio::select! {
            res = child.wait_with_output() => match res {
                Ok(output) => self.finished(output, started),
                Err(e) => InvocationResult {
                    outcome: Err(AttemptError::StrategyFailed {
                        failure: FailureKind::IoError,
                        exit_code: None,
                        detail: format!("waiting for {} failed: {e}", self.program.display()),
                    }),
                    exit_code: None,
                    diagnostics: e.to_string(),
                    elapsed: started.elapsed(),
                },
            },
            _ = tokio::time::sleep(self.timeout) => {
                warn!(
                    "{} exceeded {}s, killed",
                    self.program.display(),
                    self.timeout.as_secs()
                );
                InvocationResult {
                    outcome: Err(AttemptError::Timeout { secs: self.timeout.as_secs() }),
                    exit_code: None,
                    diagnostics: format!("timed out after {}s", self.timeout.as_secs()),
                    elapsed: started.elapsed(),
                }
            },
            _ = cancel.cancelled() => {
                debug!("{} cancelled, killed", self.program.display());
                InvocationResult::cancelled(started)
            },
        }
    }

    fn finished(&self, output: std::process::Output, started: Instant) -> InvocationResult {
        let exit_code = output.status.code();
        let mut diagnostics = combine_output(&output.stderr, &output.stdout);
        let classification =
            classify::classify(self.tool, exit_code, &self.success_codes, &diagnostics);

        let outcome = match classification {
            Classification::Success => Ok(()),
            Classification::Failure(failure) => {
                if diagnostics.is_empty() {
                    diagnostics = match exit_code {
                        Some(c) => format!("exit code {c}"),
                        None => "terminated by signal".to_string(),
                    };
                }
                Err(AttemptError::StrategyFailed {
                    failure,
                    exit_code,
                    detail: classify::headline(self.tool, &diagnostics),
                })
            }
        };

        debug!(
            "{} finished: exit {:?}, {:?} in {:.2}s",
            self.program.display(),
            exit_code,
            classification,
            started.elapsed().as_secs_f64()
        );

        InvocationResult {
            outcome,
            exit_code,
            diagnostics,
            elapsed: started.elapsed(),
        }
    }

    fn spawn_failure(&self, e: std::io::Error, started: Instant) -> InvocationResult {
        let outcome = match (e.kind(), self.tool) {
            (std::io::ErrorKind::NotFound, Some(tool)) => Err(AttemptError::ToolNotAvailable { tool }),
            _ => Err(AttemptError::StrategyFailed {
                failure: FailureKind::SpawnFailed,
                exit_code: None,
                detail: e.to_string(),
            }),
        };
        InvocationResult {
            outcome,
            exit_code: None,
            diagnostics: format!("failed to start {}: {e}", self.program.display()),
            elapsed: started.elapsed(),
        }
    }
}

/// Outcome of one [`ToolCommand::run`].
#[derive(Debug, Clone)]
pub struct InvocationResult {
    /// `Ok(())` when the run counts as a success.
    pub outcome: Result<(), AttemptError>,
    pub exit_code: Option<i32>,
    /// stderr followed by stdout, trimmed and tail-truncated.
    pub diagnostics: String,
    pub elapsed: Duration,
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    fn cancelled(started: Instant) -> Self {
        Self {
            outcome: Err(AttemptError::Cancelled),
            exit_code: None,
            diagnostics: "cancelled".to_string(),
            elapsed: started.elapsed(),
        }
    }
}

fn combine_output(stderr: &[u8], stdout: &[u8]) -> String {
    let err = String::from_utf8_lossy(stderr);
    let out = String::from_utf8_lossy(stdout);
    let combined = match (err.trim().is_empty(), out.trim().is_empty()) {
        (false, false) => format!("{}\n{}", err.trim(), out.trim()),
        (false, true) => err.trim().to_string(),
        (true, false) => out.trim().to_string(),
        (true, true) => String::new(),
    };
    truncate_tail(&combined, MAX_DIAGNOSTIC_CHARS)
}

/// Keep the last `max` characters, prefixed with an ellipsis when cut.
pub fn truncate_tail(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max).collect();
    format!("…{tail}")
}
