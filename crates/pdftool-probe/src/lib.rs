//! # pdftool-probe
//!
//! Locate the external PDF command-line tools a host machine provides
//! (Ghostscript, qpdf, Poppler's `pdftops` / `pdftoppm`) and record their
//! versions, so that callers can decide up-front which invocation strategies
//! are even possible.
//!
//! ## How it works
//!
//! On first call to [`ToolRegistry::global`]:
//!
//! 1. For every [`ToolKind`], checks the `ROTO_*_PATH` override variable.
//! 2. Otherwise searches `PATH`, then the usual package-manager prefixes
//!    (`/usr/bin`, `/usr/local/bin`, `/opt/homebrew/bin`).
//! 3. Runs the tool's version command once and keeps the version string.
//!
//! The result is cached for the lifetime of the process. Tests and embedders
//! that need a different view build their own registry with
//! [`ToolRegistry::empty`] + [`ToolRegistry::with_tool`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pdftool_probe::{ToolKind, ToolRegistry};
//!
//! let tools = ToolRegistry::global();
//! match tools.get(ToolKind::Ghostscript) {
//!     Some(gs) => println!("gs {} at {}", gs.version_or_unknown(), gs.path.display()),
//!     None => eprintln!("Ghostscript not installed"),
//! }
//! ```
//!
//! ## Environment variable overrides
//!
//! | Variable             | Tool        |
//! |----------------------|-------------|
//! | `ROTO_GS_PATH`       | Ghostscript |
//! | `ROTO_QPDF_PATH`     | qpdf        |
//! | `ROTO_PDFTOPS_PATH`  | pdftops     |
//! | `ROTO_PDFTOPPM_PATH` | pdftoppm    |
//! | `ROTO_CACHE_DIR`     | cache root used by [`default_cache_dir`] |

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

// ── Public constants ─────────────────────────────────────────────────────────

/// Directories searched after `PATH`, in order.
///
/// GUI launchers on macOS start processes with a minimal `PATH` that omits
/// Homebrew, so both Homebrew prefixes are always checked explicitly.
pub const FALLBACK_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"];

/// Longest a version command may run before it is killed.
///
/// A wrapper script behind `ROTO_GS_PATH` that waits on stdin or a network
/// mount would otherwise stall detection forever.
pub const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by probe operations.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The version command could not be spawned.
    #[error("Failed to run '{path}': {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The version command did not exit in time and was killed.
    #[error("'{path}' did not answer within {timeout:?}")]
    TimedOut { path: PathBuf, timeout: Duration },

    /// The version command ran but printed nothing that looks like a version.
    #[error("No version found in output of {tool}: {output:?}")]
    NoVersion { tool: ToolKind, output: String },
}

// ── Tool kinds ───────────────────────────────────────────────────────────────

/// One of the external tools a strategy may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Ghostscript (`gs`): PDF rewriting, flattening, rasterising.
    Ghostscript,
    /// qpdf: structural PDF rebuilds and stream compression.
    Qpdf,
    /// Poppler `pdftops`: PDF → PostScript.
    Pdftops,
    /// Poppler `pdftoppm`: PDF → page images.
    Pdftoppm,
}

impl ToolKind {
    /// Every known tool, in a stable order.
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Ghostscript,
        ToolKind::Qpdf,
        ToolKind::Pdftops,
        ToolKind::Pdftoppm,
    ];

    /// Executable names to look for, most specific first.
    pub fn binary_names(self) -> &'static [&'static str] {
        match self {
            #[cfg(windows)]
            ToolKind::Ghostscript => &["gswin64c.exe", "gswin32c.exe", "gs.exe"],
            #[cfg(not(windows))]
            ToolKind::Ghostscript => &["gs"],
            #[cfg(windows)]
            ToolKind::Qpdf => &["qpdf.exe"],
            #[cfg(not(windows))]
            ToolKind::Qpdf => &["qpdf"],
            #[cfg(windows)]
            ToolKind::Pdftops => &["pdftops.exe"],
            #[cfg(not(windows))]
            ToolKind::Pdftops => &["pdftops"],
            #[cfg(windows)]
            ToolKind::Pdftoppm => &["pdftoppm.exe"],
            #[cfg(not(windows))]
            ToolKind::Pdftoppm => &["pdftoppm"],
        }
    }

    /// Environment variable that pins the tool to an explicit path.
    pub fn env_override(self) -> &'static str {
        match self {
            ToolKind::Ghostscript => "ROTO_GS_PATH",
            ToolKind::Qpdf => "ROTO_QPDF_PATH",
            ToolKind::Pdftops => "ROTO_PDFTOPS_PATH",
            ToolKind::Pdftoppm => "ROTO_PDFTOPPM_PATH",
        }
    }

    /// Arguments that make the tool print its version and exit.
    ///
    /// Poppler tools print the version on stderr; the others use stdout.
    pub fn version_args(self) -> &'static [&'static str] {
        match self {
            ToolKind::Ghostscript | ToolKind::Qpdf => &["--version"],
            ToolKind::Pdftops | ToolKind::Pdftoppm => &["-v"],
        }
    }

    /// Short lowercase name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::Ghostscript => "ghostscript",
            ToolKind::Qpdf => "qpdf",
            ToolKind::Pdftops => "pdftops",
            ToolKind::Pdftoppm => "pdftoppm",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tool info & registry ─────────────────────────────────────────────────────

/// A located tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInfo {
    pub kind: ToolKind,
    pub path: PathBuf,
    /// Version reported by the tool, `None` when the version probe failed.
    pub version: Option<String>,
}

impl ToolInfo {
    pub fn version_or_unknown(&self) -> &str {
        self.version.as_deref().unwrap_or("unknown")
    }
}

/// The set of tools available to this process.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolKind, ToolInfo>,
}

static GLOBAL: OnceLock<ToolRegistry> = OnceLock::new();

impl ToolRegistry {
    /// A registry with no tools at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Probe the host for every [`ToolKind`].
    ///
    /// Spawns one short-lived version process per located tool. Prefer
    /// [`ToolRegistry::global`] unless a fresh view is really needed.
    pub fn detect() -> Self {
        let mut registry = Self::empty();
        for kind in ToolKind::ALL {
            let Some(path) = locate(kind) else {
                debug!("{} not found", kind);
                continue;
            };
            let version = match probe_version(kind, &path) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("{} found at {} but version probe failed: {}", kind, path.display(), e);
                    None
                }
            };
            debug!(
                "{} → {} ({})",
                kind,
                path.display(),
                version.as_deref().unwrap_or("unknown")
            );
            registry.tools.insert(kind, ToolInfo { kind, path, version });
        }
        registry
    }

    /// Process-wide registry, detected on first use.
    ///
    /// Safe to call from multiple threads; detection runs once.
    pub fn global() -> &'static ToolRegistry {
        GLOBAL.get_or_init(Self::detect)
    }

    /// Register (or replace) a tool at an explicit path.
    pub fn with_tool(
        mut self,
        kind: ToolKind,
        path: impl Into<PathBuf>,
        version: Option<&str>,
    ) -> Self {
        self.tools.insert(
            kind,
            ToolInfo {
                kind,
                path: path.into(),
                version: version.map(str::to_string),
            },
        );
        self
    }

    pub fn get(&self, kind: ToolKind) -> Option<&ToolInfo> {
        self.tools.get(&kind)
    }

    pub fn is_available(&self, kind: ToolKind) -> bool {
        self.tools.contains_key(&kind)
    }

    /// Version string used in fingerprints: the reported version, `"unknown"`
    /// when the probe failed, `"absent"` when the tool is missing.
    pub fn version_tag(&self, kind: ToolKind) -> &str {
        self.get(kind)
            .map(ToolInfo::version_or_unknown)
            .unwrap_or("absent")
    }

    /// Located tools, ordered by kind.
    pub fn iter(&self) -> impl Iterator<Item = &ToolInfo> {
        self.tools.values()
    }

    /// Kinds that were not found.
    pub fn missing(&self) -> Vec<ToolKind> {
        ToolKind::ALL
            .into_iter()
            .filter(|k| !self.tools.contains_key(k))
            .collect()
    }
}

// ── Lookup ───────────────────────────────────────────────────────────────────

/// Find the executable for `kind`.
///
/// Resolution order: `ROTO_*_PATH` override, every `PATH` entry, then
/// [`FALLBACK_DIRS`]. An override pointing at a missing file is reported and
/// ignored.
pub fn locate(kind: ToolKind) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(kind.env_override()) {
        let pb = PathBuf::from(&p);
        if is_executable(&pb) {
            return Some(pb);
        }
        warn!(
            "{} is set to '{}' but no executable exists there; searching PATH",
            kind.env_override(),
            p
        );
    }

    let path_dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|v| std::env::split_paths(&v).collect())
        .unwrap_or_default();

    let fallback = FALLBACK_DIRS.iter().map(PathBuf::from);

    for dir in path_dirs.into_iter().chain(fallback) {
        for name in kind.binary_names() {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Run the tool's version command and extract the version token.
///
/// Blocks for at most [`VERSION_TIMEOUT`].
pub fn probe_version(kind: ToolKind, path: &Path) -> Result<String, ProbeError> {
    let text = capture_output(path, kind.version_args(), VERSION_TIMEOUT)?;
    parse_version(&text).ok_or_else(|| ProbeError::NoVersion {
        tool: kind,
        output: text.trim().to_string(),
    })
}

/// stdout and stderr of `program args`, killing it after `timeout`.
fn capture_output(program: &Path, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
    let spawn_err = |source| ProbeError::Spawn {
        path: program.to_path_buf(),
        source,
    };
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait().map_err(spawn_err)? {
            Some(_) => break,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::TimedOut {
                    path: program.to_path_buf(),
                    timeout,
                });
            }
            None => std::thread::sleep(POLL_INTERVAL),
        }
    }

    let output = child.wait_with_output().map_err(spawn_err)?;
    Ok(format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    ))
}

/// First whitespace-separated token that starts with a digit and contains a dot.
///
/// Handles `10.02.1`, `qpdf version 11.9.0` and `pdftops version 24.02.0`.
pub fn parse_version(text: &str) -> Option<String> {
    text.split_whitespace()
        .find(|tok| tok.starts_with(|c: char| c.is_ascii_digit()) && tok.contains('.'))
        .map(|tok| tok.trim_end_matches([',', ';', ')']).to_string())
}

/// Root directory for persisted roto data (e.g. the strategy cache).
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/roto-pdf/`
/// - **Linux**: `~/.cache/roto-pdf/`
/// - **Windows**: `%LOCALAPPDATA%\roto-pdf\`
///
/// Override by setting `ROTO_CACHE_DIR`.
pub fn default_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("ROTO_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("roto-pdf")
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
