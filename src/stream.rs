//! Streaming batch API: emit job reports as they complete.
//!
//! [`crate::compress_batch`] waits for every job and sorts the reports.
//! [`compress_stream`] yields each [`JobReport`] as soon as its job
//! finishes, so callers can print results, move files on or update a UI
//! while slower jobs are still running. Reports arrive in completion order;
//! sort by `job_id` if order matters.

use crate::compress::compress_job;
use crate::config::RunConfig;
use crate::output::{Job, JobReport};
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of job reports.
pub type JobStream = Pin<Box<dyn Stream<Item = JobReport> + Send>>;

/// Run `jobs` with at most `config.concurrency` in flight, streaming reports.
///
/// Jobs are independent: one failure never stops the others. Batch progress
/// hooks are not fired here; [`crate::compress_batch`] does that.
///
/// # Example
/// ```rust,no_run
/// use roto_pdf::{compress_stream, CompressionProfile, Job, RunConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() {
/// let jobs = vec![
///     Job::new(0, "a.pdf", "out/a-hq.pdf", CompressionProfile::hq()),
///     Job::new(1, "b.pdf", "out/b-hq.pdf", CompressionProfile::hq()),
/// ];
/// let mut reports = compress_stream(jobs, &RunConfig::default());
/// while let Some(report) = reports.next().await {
///     match &report.result {
///         Ok(o) => println!("job {}: {}", report.job_id, o.strategy_used),
///         Err(e) => eprintln!("job {}: {e}", report.job_id),
///     }
/// }
/// # }
/// ```
pub fn compress_stream(jobs: Vec<Job>, config: &RunConfig) -> JobStream {
    info!("Streaming {} jobs, concurrency {}", jobs.len(), config.concurrency);
    let concurrency = config.concurrency.max(1);
    let config = config.clone();

    let s = stream::iter(jobs.into_iter().map(move |job| {
        let cfg = config.clone();
        async move {
            let result = compress_job(&job, &cfg).await;
            JobReport {
                job_id: job.id,
                input: job.input,
                output: job.output,
                profile: job.profile.name,
                result,
            }
        }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}
