//! Winner cache: remembers which strategy last succeeded for a ladder.
//!
//! Entries are keyed by a [`Fingerprint`] of the goal, the versions of every
//! tool the ladder references, the strategy names and a hash of the whole
//! ladder definition. Upgrading Ghostscript or editing a strategy's
//! arguments therefore invalidates old entries on its own.
//!
//! The façade reads the cache once when a job starts and writes it once after
//! the job has succeeded. Attempts never see it change under them.

use crate::config::Goal;
use crate::error::RotoError;
use crate::pipeline::strategy::Ladder;
use pdftool_probe::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// File name of the persisted cache inside the cache directory.
pub const CACHE_FILE_NAME: &str = "strategy-cache.json";

/// Stable key of a (goal, tool versions, ladder) combination.
///
/// Rendered as `goal|tool@version,…|name,…|ladder-hash` so the cache file
/// stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(goal: Goal, ladder: &Ladder, tools: &ToolRegistry) -> Self {
        let versions: Vec<String> = ladder
            .required_tools()
            .into_iter()
            .map(|kind| format!("{kind}@{}", tools.version_tag(kind)))
            .collect();
        let definition = serde_json::to_vec(ladder).unwrap_or_default();
        Fingerprint(format!(
            "{goal}|{}|{}|{:016x}",
            versions.join(","),
            ladder.names().join(","),
            fnv1a(&definition)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 64-bit FNV-1a: stable across builds and platforms, unlike `DefaultHasher`.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Name of the last winning strategy.
    pub strategy: String,
    /// Number of successful jobs recorded under this fingerprint.
    pub successes: u64,
}

/// Thread-safe winner cache, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct StrategyCache {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
    path: Option<PathBuf>,
    /// Held from snapshot to rename so files land in snapshot order.
    save_lock: Mutex<()>,
}

impl StrategyCache {
    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// `<cache dir>/strategy-cache.json`, honouring `ROTO_CACHE_DIR`.
    pub fn default_path() -> PathBuf {
        pdftool_probe::default_cache_dir().join(CACHE_FILE_NAME)
    }

    /// Load from `path`. A missing file gives an empty cache; an unreadable or
    /// malformed one is logged and ignored, and will be overwritten on save.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<Fingerprint, CacheEntry>>(&text) {
                Ok(entries) => {
                    debug!("Loaded {} cache entries from {}", entries.len(), path.display());
                    entries
                }
                Err(e) => {
                    warn!("Ignoring malformed strategy cache {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("Cannot read strategy cache {}: {}", path.display(), e);
                HashMap::new()
            }
        };
        Self {
            entries: RwLock::new(entries),
            path: Some(path),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Fingerprint, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Fingerprint, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Last winner recorded for `fp`.
    pub fn lookup(&self, fp: &Fingerprint) -> Option<String> {
        self.read().get(fp).map(|e| e.strategy.clone())
    }

    pub fn entry(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        self.read().get(fp).cloned()
    }

    /// Record a successful job.
    pub fn record(&self, fp: Fingerprint, strategy: &str) {
        let mut entries = self.write();
        let entry = entries.entry(fp).or_insert_with(|| CacheEntry {
            strategy: strategy.to_string(),
            successes: 0,
        });
        entry.strategy = strategy.to_string();
        entry.successes += 1;
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Write the cache to its file, atomically. No-op for in-memory caches.
    pub fn save(&self) -> Result<(), RotoError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _saving = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let (json, count) = {
            let entries = self.read();
            let json = serde_json::to_string_pretty(&*entries)
                .map_err(|e| RotoError::Internal(format!("cache serialisation: {e}")))?;
            (json, entries.len())
        };

        let write_err = |source: std::io::Error| RotoError::OutputWriteFailed {
            path: path.clone(),
            source,
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        debug!("Saved {} cache entries to {}", count, path.display());
        Ok(())
    }
}
