//! Eager entry points: run a job (or a batch, or a whole document) and wait
//! for the result.
//!
//! Use [`crate::stream::compress_stream`] instead when reports should be
//! handled as each job finishes.

use crate::cache::Fingerprint;
use crate::config::{validate_profile, CompressionProfile, RunConfig};
use crate::error::RotoError;
use crate::output::{DocumentInfo, DocumentReport, Job, JobOutcome, JobReport};
use crate::pipeline::ladder::{run_ladder, LadderContext, LadderFailure};
use crate::pipeline::workspace::{remove_stale_output, JobWorkspace};
use crate::pipeline::{input, merge, trim};
use crate::stream::compress_stream;
use futures::StreamExt;
use pdftool_probe::ToolRegistry;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Transform `input` into `output` under `profile`.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// The winning strategy and the full attempt history.
///
/// # Errors
/// - Input missing, unreadable or not a PDF (no strategy runs)
/// - [`RotoError::AllStrategiesExhausted`] with every attempt in order
/// - [`RotoError::Cancelled`] when the config's cancel token fired
///
/// On every error path nothing is left at `output`, including a file from
/// an earlier run.
///
/// # Example
/// ```rust,no_run
/// use roto_pdf::{compress, CompressionProfile, RunConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let outcome = compress(
///     "brochure.pdf",
///     "brochure-hq.pdf",
///     &CompressionProfile::hq(),
///     &RunConfig::default(),
/// )
/// .await?;
/// println!("{} via {}", outcome.output.display(), outcome.strategy_used);
/// # Ok(())
/// # }
/// ```
pub async fn compress(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    profile: &CompressionProfile,
    config: &RunConfig,
) -> Result<JobOutcome, RotoError> {
    let job = Job::new(0, input.as_ref(), output.as_ref(), profile.clone());
    compress_job(&job, config).await
}

/// Run one [`Job`]; [`compress`] with a caller-chosen job id.
pub async fn compress_job(job: &Job, config: &RunConfig) -> Result<JobOutcome, RotoError> {
    if same_file(&job.input, &job.output) {
        // Never clean up here: the "stale output" is the input.
        return Err(RotoError::InvalidConfig(format!(
            "Output '{}' would overwrite the input",
            job.output.display()
        )));
    }

    let result = run_job(job, config).await;
    if let Err(e) = &result {
        remove_stale_output(&job.output);
        warn!("Job {} failed: {}", job.id, e);
        if let Some(cb) = &config.progress_callback {
            cb.on_job_failed(job.id, &e.to_string());
        }
    }
    result
}

async fn run_job(job: &Job, config: &RunConfig) -> Result<JobOutcome, RotoError> {
    let started = Instant::now();

    // ── Validate before any tool runs ────────────────────────────────────
    let input = input::resolve_input(&job.input)?;
    validate_profile(&job.profile)?;
    let input_bytes = std::fs::metadata(&input).map(|m| m.len()).unwrap_or(0);

    let goal = job.profile.goal();
    info!(
        "Job {}: {} → {} ({}, {})",
        job.id,
        input.display(),
        job.output.display(),
        job.profile.name,
        goal
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_job_start(job.id, &input, goal);
    }

    // ── Resolve the ladder, consult the cache once ───────────────────────
    if config.tools.is_none() {
        // First detection runs every tool once; keep it off the runtime workers.
        tokio::task::spawn_blocking(ToolRegistry::global)
            .await
            .map_err(|e| RotoError::Internal(format!("tool detection failed: {e}")))?;
    }
    let ladder = config.ladders.ladder(goal);
    let tools = config.tools();
    let fingerprint = config
        .cache
        .as_ref()
        .map(|_| Fingerprint::of(goal, ladder, tools));
    let preferred = match (&config.cache, &fingerprint) {
        (Some(cache), Some(fp)) if config.prefer_cached_strategy => cache.lookup(fp),
        _ => None,
    };
    if let Some(name) = &preferred {
        debug!("Job {}: cached winner {} goes first", job.id, name);
    }
    let order = ladder.attempt_order(preferred.as_deref());

    // ── Run the ladder inside a private workspace ────────────────────────
    let workspace = JobWorkspace::create(&job.output)?;
    let ctx = LadderContext {
        job_id: job.id,
        input: &input,
        profile: &job.profile,
        tools,
        workspace: &workspace,
        default_timeout: Duration::from_secs(config.strategy_timeout_secs),
        cancel: &config.cancel,
        progress: config.progress_callback.as_deref(),
        validate_output: config.validate_output,
    };

    let success = match run_ladder(&order, &ctx).await {
        Ok(success) => success,
        Err(LadderFailure::Exhausted(attempts)) => {
            return Err(RotoError::AllStrategiesExhausted { goal, attempts })
        }
        Err(LadderFailure::Cancelled(attempts)) => return Err(RotoError::Cancelled { attempts }),
    };

    // ── Promote and remember the winner ──────────────────────────────────
    let output = workspace.promote(&success.staged)?.to_path_buf();
    let output_bytes = std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0);

    if let (Some(cache), Some(fp)) = (&config.cache, fingerprint) {
        cache.record(fp, &success.strategy);
        if let Err(e) = cache.save() {
            warn!("Could not save strategy cache: {}", e);
        }
    }

    if let Some(cb) = &config.progress_callback {
        cb.on_job_complete(job.id, &success.strategy, &output);
    }

    let outcome = JobOutcome {
        output,
        strategy_used: success.strategy,
        goal,
        attempts: success.attempts,
        input_bytes,
        output_bytes,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        "Job {}: done via {} ({} → {} bytes, {}ms)",
        job.id, outcome.strategy_used, input_bytes, output_bytes, outcome.duration_ms
    );
    Ok(outcome)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Synchronous wrapper around [`compress`].
///
/// Creates a temporary tokio runtime internally.
pub fn compress_sync(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    profile: &CompressionProfile,
    config: &RunConfig,
) -> Result<JobOutcome, RotoError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| RotoError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(compress(input, output, profile, config))
}

/// Run independent jobs concurrently, at most `config.concurrency` at once.
///
/// Reports come back sorted by job id. Every job runs to completion (or
/// failure) regardless of the others.
pub async fn compress_batch(jobs: &[Job], config: &RunConfig) -> Vec<JobReport> {
    if let Some(cb) = &config.progress_callback {
        cb.on_batch_start(jobs.len());
    }

    let mut reports: Vec<JobReport> = compress_stream(jobs.to_vec(), config).collect().await;
    reports.sort_by_key(|r| r.job_id);

    let succeeded = reports.iter().filter(|r| r.is_success()).count();
    info!("Batch complete: {}/{} jobs succeeded", succeeded, reports.len());
    if let Some(cb) = &config.progress_callback {
        cb.on_batch_complete(reports.len(), succeeded);
    }
    reports
}

/// Trim bleed from `input`, then produce one variant per profile in `out_dir`.
///
/// With trimming enabled the outputs are `{stem}-net.pdf` and
/// `{stem}-net-{profile}.pdf`; without it, `{stem}-{profile}.pdf` built from
/// the untouched input. A failed variant does not stop the others.
pub async fn prepare_document(
    input: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    profiles: &[CompressionProfile],
    config: &RunConfig,
) -> Result<DocumentReport, RotoError> {
    let source = input::resolve_input(input.as_ref())?;
    check_profiles(profiles)?;
    prepare_source(source, out_dir.as_ref(), profiles, config, Vec::new()).await
}

/// Concatenate `inputs` into `{out_dir}/{label}.pdf`, then prepare that file
/// like [`prepare_document`] does.
///
/// Every input is checked before anything is written. Outputs are named
/// after `label`: `{label}-net.pdf`, `{label}-net-{profile}.pdf`, and so on.
pub async fn prepare_merged<P: AsRef<Path>>(
    inputs: &[P],
    label: &str,
    out_dir: impl AsRef<Path>,
    profiles: &[CompressionProfile],
    config: &RunConfig,
) -> Result<DocumentReport, RotoError> {
    if inputs.is_empty() {
        return Err(RotoError::InvalidConfig("Nothing to merge".into()));
    }
    validate_label(label)?;
    let sources = inputs
        .iter()
        .map(|p| input::resolve_input(p.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    check_profiles(profiles)?;

    let out_dir = out_dir.as_ref();
    let merged = out_dir.join(format!("{label}.pdf"));
    if let Some(src) = sources.iter().find(|s| same_file(s, &merged)) {
        return Err(RotoError::InvalidConfig(format!(
            "Merged file '{}' would overwrite the input '{}'",
            merged.display(),
            src.display()
        )));
    }
    merge::merge_pdfs(&sources, &merged).await?;

    let source = input::resolve_input(&merged)?;
    prepare_source(source, out_dir, profiles, config, sources).await
}

fn validate_label(label: &str) -> Result<(), RotoError> {
    let bad = label.trim().is_empty()
        || label == "."
        || label == ".."
        || label.contains(['/', '\\'])
        || label.ends_with(".pdf");
    if bad {
        return Err(RotoError::InvalidConfig(format!(
            "Merge label '{label}' must be a plain file stem"
        )));
    }
    Ok(())
}

fn check_profiles(profiles: &[CompressionProfile]) -> Result<(), RotoError> {
    if profiles.is_empty() {
        return Err(RotoError::InvalidConfig("At least one profile is required".into()));
    }
    let mut names = HashSet::new();
    for p in profiles {
        validate_profile(p)?;
        if !names.insert(p.name.as_str()) {
            return Err(RotoError::InvalidConfig(format!(
                "Profile '{}' requested twice",
                p.name
            )));
        }
    }
    Ok(())
}

async fn prepare_source(
    source: PathBuf,
    out_dir: &Path,
    profiles: &[CompressionProfile],
    config: &RunConfig,
    merged_from: Vec<PathBuf>,
) -> Result<DocumentReport, RotoError> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let (base, prefix, cleaned, trims) = if config.trim_bleed {
        let cleaned = out_dir.join(format!("{stem}-net.pdf"));
        if same_file(&source, &cleaned) || merged_from.iter().any(|m| same_file(m, &cleaned)) {
            return Err(RotoError::InvalidConfig(format!(
                "Trimmed copy '{}' would overwrite the input",
                cleaned.display()
            )));
        }
        let trims = trim::clean_pdf(&source, &cleaned, config.bleed_mm).await?;
        (cleaned.clone(), format!("{stem}-net"), Some(cleaned), trims)
    } else {
        (source.clone(), stem.clone(), None, Vec::new())
    };

    let jobs: Vec<Job> = profiles
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let output = out_dir.join(format!("{prefix}-{}.pdf", p.name));
            Job::new(i, &base, output, p.clone())
        })
        .collect();
    let variants = compress_batch(&jobs, config).await;

    Ok(DocumentReport {
        source,
        merged_from,
        cleaned,
        trims,
        variants,
    })
}

/// Read page count, PDF version and page boxes without transforming anything.
///
/// Needs no external tool.
pub async fn inspect(input: impl AsRef<Path>) -> Result<DocumentInfo, RotoError> {
    let path = input::resolve_input(input.as_ref())?;
    trim::read_document_info(&path).await
}
