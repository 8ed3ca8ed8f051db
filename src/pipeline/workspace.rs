//! Per-job private workspace.
//!
//! Every job gets a hidden temporary directory *next to its output path*
//! (`.roto-XXXXXX/`). Strategies write only inside it, one sub-directory per
//! attempt. Because the workspace lives on the same filesystem as the output,
//! promoting the winner is a plain `rename`: readers of the output path see
//! either the old file, nothing, or the complete new file.
//!
//! The directory is removed when the [`JobWorkspace`] is dropped, including
//! on early returns, cancellation and panics.

use crate::error::RotoError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

pub struct JobWorkspace {
    dir: TempDir,
    output: PathBuf,
}

impl JobWorkspace {
    /// Create a workspace beside `output`, creating the parent directory if needed.
    pub fn create(output: &Path) -> Result<Self, RotoError> {
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        std::fs::create_dir_all(&parent).map_err(|source| RotoError::WorkspaceFailed {
            dir: parent.clone(),
            source,
        })?;
        let parent = parent
            .canonicalize()
            .map_err(|source| RotoError::WorkspaceFailed {
                dir: parent.clone(),
                source,
            })?;

        let dir = tempfile::Builder::new()
            .prefix(".roto-")
            .tempdir_in(&parent)
            .map_err(|source| RotoError::WorkspaceFailed {
                dir: parent.clone(),
                source,
            })?;

        debug!("Workspace {} for {}", dir.path().display(), output.display());
        Ok(Self {
            dir,
            output: output.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Fresh directory for attempt `index` (1-based) of `strategy`.
    pub fn attempt_dir(&self, index: usize, strategy: &str) -> std::io::Result<PathBuf> {
        let safe: String = strategy
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let dir = self.dir.path().join(format!("{index:02}-{safe}"));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove everything a failed attempt produced.
    pub fn discard(&self, attempt_dir: &Path) {
        if let Err(e) = std::fs::remove_dir_all(attempt_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove {}: {}", attempt_dir.display(), e);
            }
        }
    }

    /// Move the staged winner into the output path, replacing any old file.
    pub fn promote(&self, staged: &Path) -> Result<&Path, RotoError> {
        std::fs::rename(staged, &self.output).map_err(|source| RotoError::OutputWriteFailed {
            path: self.output.clone(),
            source,
        })?;
        debug!("Promoted {} → {}", staged.display(), self.output.display());
        Ok(&self.output)
    }
}

/// Remove a stale file at `path`, so failed jobs leave nothing behind.
pub fn remove_stale_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove stale output {}: {}", path.display(), e),
    }
}
