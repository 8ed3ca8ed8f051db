//! Progress-callback trait for job and strategy events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::RunConfigBuilder::progress_callback`] to observe jobs as
//! they move down their ladders. This is where non-fatal attempt failures
//! become visible before the job finishes.
//!
//! # Example
//!
//! ```rust
//! use roto_pdf::{AttemptError, JobProgressCallback, RunConfig};
//! use std::sync::Arc;
//!
//! struct FallbackLogger;
//!
//! impl JobProgressCallback for FallbackLogger {
//!     fn on_attempt_failed(&self, job_id: usize, strategy: &str, error: &AttemptError) {
//!         eprintln!("job {job_id}: {strategy} failed ({error}), falling back");
//!     }
//! }
//!
//! let config = RunConfig::builder()
//!     .progress_callback(Arc::new(FallbackLogger))
//!     .build()
//!     .unwrap();
//! ```

use crate::config::Goal;
use crate::error::AttemptError;
use std::path::Path;
use std::sync::Arc;

/// Called by the façade and the ladder as jobs progress.
///
/// Implementations must be `Send + Sync`: batch operations run several jobs
/// concurrently, so calls for different `job_id`s may interleave. Calls for a
/// single job are always sequential. Every method has a no-op default.
pub trait JobProgressCallback: Send + Sync {
    /// Called once before the first job of a batch starts.
    fn on_batch_start(&self, total_jobs: usize) {
        let _ = total_jobs;
    }

    /// Called after input validation, before the first strategy.
    fn on_job_start(&self, job_id: usize, input: &Path, goal: Goal) {
        let _ = (job_id, input, goal);
    }

    /// Called before each strategy attempt.
    ///
    /// # Arguments
    /// * `index` is 1-based; `total` is the ladder length.
    fn on_attempt_start(&self, job_id: usize, strategy: &str, index: usize, total: usize) {
        let _ = (job_id, strategy, index, total);
    }

    /// Called when an attempt fails and the ladder advances.
    fn on_attempt_failed(&self, job_id: usize, strategy: &str, error: &AttemptError) {
        let _ = (job_id, strategy, error);
    }

    /// Called when the winning output has been moved into place.
    fn on_job_complete(&self, job_id: usize, strategy_used: &str, output: &Path) {
        let _ = (job_id, strategy_used, output);
    }

    /// Called when a job ends without output.
    fn on_job_failed(&self, job_id: usize, error: &str) {
        let _ = (job_id, error);
    }

    /// Called once after every job of a batch has finished.
    fn on_batch_complete(&self, total_jobs: usize, succeeded: usize) {
        let _ = (total_jobs, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RunConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;
