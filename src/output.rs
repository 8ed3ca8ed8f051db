//! Result types returned by the façade.

use crate::config::{CompressionProfile, Goal};
use crate::error::{AttemptError, RotoError};
use crate::pipeline::trim::{PageBoxes, PageTrim};
use serde::Serialize;
use std::path::PathBuf;

/// One strategy attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based position in the attempt order.
    pub index: usize,
    pub strategy: String,
    /// `None` when the attempt succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AttemptError>,
    /// Exit code of the last tool step that ran, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Combined tool output and builtin summaries, one block per step.
    pub diagnostics: String,
    pub duration_ms: u64,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A successfully completed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub output: PathBuf,
    /// Name of the strategy whose output was kept.
    pub strategy_used: String,
    pub goal: Goal,
    /// Every attempt in order; the last one is the winner.
    pub attempts: Vec<AttemptRecord>,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub duration_ms: u64,
}

impl JobOutcome {
    /// Output size relative to input (0.25 means a 75 % reduction).
    pub fn size_ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            1.0
        } else {
            self.output_bytes as f64 / self.input_bytes as f64
        }
    }

    /// `true` when the first strategy did not win.
    pub fn fell_back(&self) -> bool {
        self.attempts.len() > 1
    }
}

/// One request: transform `input` into `output` under `profile`.
#[derive(Debug, Clone)]
pub struct Job {
    /// Caller-chosen identifier, echoed in progress events and reports.
    pub id: usize,
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: CompressionProfile,
}

impl Job {
    pub fn new(
        id: usize,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        profile: CompressionProfile,
    ) -> Self {
        Self {
            id,
            input: input.into(),
            output: output.into(),
            profile,
        }
    }
}

/// Result of one job inside a batch.
#[derive(Debug)]
pub struct JobReport {
    pub job_id: usize,
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: String,
    pub result: Result<JobOutcome, RotoError>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Serializable view for `--json` output.
    pub fn summary(&self) -> JobSummary {
        let (status, strategy_used, error, attempts, output_bytes) = match &self.result {
            Ok(o) => ("ok", Some(o.strategy_used.clone()), None, o.attempts.clone(), Some(o.output_bytes)),
            Err(e) => ("failed", None, Some(e.to_string()), e.attempts().to_vec(), None),
        };
        JobSummary {
            job_id: self.job_id,
            input: self.input.clone(),
            output: self.output.clone(),
            profile: self.profile.clone(),
            status,
            strategy_used,
            output_bytes,
            error,
            attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: usize,
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: Vec<AttemptRecord>,
}

/// Everything [`crate::prepare_document`] or [`crate::prepare_merged`]
/// produced for one source PDF.
#[derive(Debug)]
pub struct DocumentReport {
    pub source: PathBuf,
    /// Files concatenated into `source`, in order. Empty for a single input.
    pub merged_from: Vec<PathBuf>,
    /// Bleed-trimmed copy, `None` when trimming was disabled.
    pub cleaned: Option<PathBuf>,
    pub trims: Vec<PageTrim>,
    /// One report per requested profile, in profile order.
    pub variants: Vec<JobReport>,
}

impl DocumentReport {
    pub fn all_succeeded(&self) -> bool {
        self.variants.iter().all(JobReport::is_success)
    }
}

/// Read-only facts about a PDF, from [`crate::inspect`].
#[derive(Debug, Clone, Serialize)]
pub struct DocumentInfo {
    pub path: PathBuf,
    pub pdf_version: String,
    pub page_count: usize,
    pub file_size: u64,
    pub encrypted: bool,
    pub pages: Vec<PageBoxes>,
}
