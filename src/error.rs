//! Error types for the roto-pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`RotoError`]: **fatal**. The job cannot produce an output at all
//!   (missing input, every strategy of the ladder failed, cancelled). Returned
//!   as `Err(RotoError)` from the top-level `compress*` functions.
//!
//! * [`AttemptError`]: **non-fatal**. A single strategy attempt failed
//!   (tool missing, non-zero exit, timeout) and the ladder moved on to the
//!   next rung. Stored inside [`crate::output::AttemptRecord`] so callers can
//!   see why a more conservative strategy ended up being used.
//!
//! Attempt errors only become visible as a job failure through
//! [`RotoError::AllStrategiesExhausted`], which carries every attempt in order.

use crate::config::Goal;
use crate::output::AttemptRecord;
use crate::pipeline::classify::FailureKind;
use crate::pipeline::strategy::BuiltinOp;
use pdftool_probe::ToolKind;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the roto-pdf library.
///
/// Strategy-level failures use [`AttemptError`] and are stored in
/// [`AttemptRecord`] rather than propagated here.
#[derive(Debug, Error)]
pub enum RotoError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// The PDF object structure could not be parsed for an in-process step.
    #[error("PDF '{path}' could not be parsed: {detail}\nTry repairing with: qpdf input.pdf repaired.pdf")]
    CorruptPdf { path: PathBuf, detail: String },

    /// The requested bleed removes the whole page.
    #[error("Bleed of {bleed_mm} mm is too large for page {page} ({box_kind:?})")]
    BleedTooLarge {
        page: u32,
        box_kind: crate::pipeline::trim::BoxKind,
        bleed_mm: f64,
    },

    // ── Ladder errors ─────────────────────────────────────────────────────
    /// Every strategy of the ladder was attempted and none succeeded.
    ///
    /// The attempts are kept in the order they ran. The message names the
    /// last (most conservative) strategy, whose failure is the strongest
    /// hint that the input itself is the problem.
    #[error("{}", exhausted_message(.goal, .attempts))]
    AllStrategiesExhausted {
        goal: Goal,
        attempts: Vec<AttemptRecord>,
    },

    /// The job was cancelled; partial output has been removed.
    #[error("Job cancelled after {} attempt(s)", .attempts.len())]
    Cancelled { attempts: Vec<AttemptRecord> },

    /// A ladder definition is unusable (empty, duplicate names, bad step chain).
    #[error("Invalid ladder definition: {0}")]
    InvalidLadder(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create, move or write the output PDF.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create the per-job temporary workspace.
    #[error("Failed to create a job workspace in '{dir}': {source}")]
    WorkspaceFailed {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RotoError {
    /// Attempt history carried by the error, in attempt order.
    ///
    /// Empty for errors raised before any strategy ran.
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            RotoError::AllStrategiesExhausted { attempts, .. }
            | RotoError::Cancelled { attempts } => attempts,
            _ => &[],
        }
    }

    /// `(strategy name, diagnostic text)` for every attempted strategy.
    pub fn attempted_strategies(&self) -> Vec<(&str, &str)> {
        self.attempts()
            .iter()
            .map(|a| (a.strategy.as_str(), a.diagnostics.as_str()))
            .collect()
    }
}

fn exhausted_message(goal: &Goal, attempts: &[AttemptRecord]) -> String {
    match attempts.last() {
        Some(last) => {
            let mut msg = format!(
                "All {} strategies failed for '{}'.\nLast attempt '{}': {}",
                attempts.len(),
                goal,
                last.strategy,
                last.error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string()),
            );
            let diag = last.diagnostics.trim();
            if !diag.is_empty() {
                msg.push_str("\n  ");
                msg.push_str(&diag.lines().take(6).collect::<Vec<_>>().join("\n  "));
            }
            msg
        }
        None => format!("No strategy is configured for '{}'", goal),
    }
}

/// A non-fatal failure of a single strategy attempt.
///
/// Stored in [`AttemptRecord::error`]. The ladder continues with the next
/// strategy unless the attempt was cancelled.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptError {
    /// A binary the strategy needs is not installed. No process was spawned.
    #[error("{tool}: tool not found")]
    ToolNotAvailable { tool: ToolKind },

    /// The tool ran and reported failure (exit code or known error text).
    #[error("{failure}{}", exit_suffix(.exit_code))]
    StrategyFailed {
        failure: FailureKind,
        exit_code: Option<i32>,
        detail: String,
    },

    /// The strategy exceeded its time budget; the child was killed.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The strategy claimed success but its output is not a usable PDF.
    #[error("unusable output: {detail}")]
    InvalidOutput { detail: String },

    /// An in-process operation failed.
    #[error("{op} failed: {detail}")]
    Builtin { op: BuiltinOp, detail: String },

    /// Workspace I/O failed before or between steps.
    #[error("workspace I/O failed: {detail}")]
    Io { detail: String },

    /// The job was cancelled while this attempt was running.
    #[error("cancelled")]
    Cancelled,
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!(" (exit code {c})"),
        None => String::new(),
    }
}

impl AttemptError {
    /// `true` when the ladder must stop instead of advancing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AttemptError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(name: &str, index: usize, diag: &str) -> AttemptRecord {
        AttemptRecord {
            index,
            strategy: name.to_string(),
            error: Some(AttemptError::StrategyFailed {
                failure: FailureKind::RangeCheck,
                exit_code: Some(1),
                detail: diag.to_string(),
            }),
            exit_code: Some(1),
            diagnostics: diag.to_string(),
            duration_ms: 10,
        }
    }

    #[test]
    fn exhausted_display_names_last_strategy() {
        let e = RotoError::AllStrategiesExhausted {
            goal: Goal::FlattenTransparency,
            attempts: vec![
                failed("Standard", 1, "Error: /rangecheck in --setpagedevice--"),
                failed("ConvertThenMinimal", 2, "Unrecoverable error, exit code 1"),
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("All 2 strategies"), "got: {msg}");
        assert!(msg.contains("ConvertThenMinimal"), "got: {msg}");
        assert!(msg.contains("Unrecoverable error"), "got: {msg}");
    }

    #[test]
    fn attempted_strategies_keeps_order() {
        let e = RotoError::AllStrategiesExhausted {
            goal: Goal::VectorCompress,
            attempts: vec![failed("A", 1, "a"), failed("B", 2, "b")],
        };
        assert_eq!(e.attempted_strategies(), vec![("A", "a"), ("B", "b")]);
    }

    #[test]
    fn input_errors_have_no_attempts() {
        let e = RotoError::InputNotFound {
            path: PathBuf::from("/nope.pdf"),
        };
        assert!(e.attempts().is_empty());
        assert!(e.to_string().contains("/nope.pdf"));
    }

    #[test]
    fn tool_not_available_display() {
        let e = AttemptError::ToolNotAvailable {
            tool: ToolKind::Qpdf,
        };
        assert_eq!(e.to_string(), "qpdf: tool not found");
    }

    #[test]
    fn strategy_failed_display_with_exit_code() {
        let e = AttemptError::StrategyFailed {
            failure: FailureKind::VmError,
            exit_code: Some(255),
            detail: "VMerror".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("exit code 255"), "got: {msg}");
    }

    #[test]
    fn timeout_display() {
        let e = AttemptError::Timeout { secs: 90 };
        assert!(e.to_string().contains("90s"));
        assert!(!e.is_cancellation());
        assert!(AttemptError::Cancelled.is_cancellation());
    }
}
