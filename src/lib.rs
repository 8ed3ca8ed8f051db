//! # roto-pdf
//!
//! Turn press-ready PDFs into slim distribution copies by driving the
//! external PDF tools that already exist on the machine: Ghostscript, qpdf
//! and Poppler.
//!
//! ## Why a ladder?
//!
//! Print PDFs break tools in creative ways. Ghostscript dies with
//! `rangecheck` on one file, qpdf refuses another as damaged, Poppler
//! rejects a third. No single command line works for every input, but some
//! command line almost always does. Each goal therefore has an ordered
//! *ladder* of strategies, most capable first. A job walks down the ladder,
//! trying each strategy exactly once, and keeps the first output that is a
//! valid PDF. When every rung fails the error carries the full history.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     exists, readable, %PDF magic (several may be merged)
//!  ├─ 2. Trim      cut bleed back to the TrimBox (optional)
//!  ├─ 3. Goal      profile → flatten / vector compress / raster compress
//!  ├─ 4. Ladder    strategy 1 → strategy 2 → … in a private workspace
//!  └─ 5. Promote   atomic rename of the winner into the output path
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roto_pdf::{prepare_document, CompressionProfile, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let report = prepare_document(
//!         "brochure.pdf",
//!         "output",
//!         &[CompressionProfile::hq(), CompressionProfile::light()],
//!         &RunConfig::default(),
//!     )
//!     .await?;
//!     for variant in &report.variants {
//!         match &variant.result {
//!             Ok(o) => println!("{} ({})", o.output.display(), o.strategy_used),
//!             Err(e) => eprintln!("{}: {e}", variant.profile),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `roto` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! roto-pdf = { version = "0.3", default-features = false }
//! ```
//!
//! ## Profiles
//!
//! | Profile | dpi | JPEG q | Goal |
//! |---------|-----|--------|------|
//! | `hq` | 300 | 80 | vector compress |
//! | `light` | 150 | 50 | vector compress |
//! | `medium` | 150 | 75 | vector compress |
//! | `very-light` | 96 | 45 | vector compress, images halved |
//! | `raster` | 150 | 60 | raster compress |
//! | `flatten` | 300 | 80 | flatten transparency |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod cancel;
pub mod compress;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{Fingerprint, StrategyCache};
pub use cancel::CancelToken;
pub use compress::{
    compress, compress_batch, compress_job, compress_sync, inspect, prepare_document, prepare_merged,
};
pub use config::{CompressionProfile, CompressionProfileBuilder, Goal, RunConfig, RunConfigBuilder};
pub use error::{AttemptError, RotoError};
pub use output::{AttemptRecord, DocumentInfo, DocumentReport, Job, JobOutcome, JobReport, JobSummary};
pub use pdftool_probe::{ToolInfo, ToolKind, ToolRegistry};
pub use pipeline::classify::FailureKind;
pub use pipeline::merge::merge_pdfs;
pub use pipeline::strategy::{BuiltinOp, Ladder, LadderSet, OutputKind, Step, Strategy};
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{compress_stream, JobStream};
