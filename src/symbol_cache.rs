//! dSYM symbol cache
//!
//! Maps binary UUIDs to the dSYM holding their debug information so
//! symbolication tools can find dSYMs that live outside Spotlight's reach.
//! One row per UUID and at most one per `(dsym_path, architecture)`.
//!
//! The default store is a JSON file. Every change is a locked
//! read-modify-write followed by an atomic rename, so concurrent bridge
//! invocations never see a torn file and the last writer wins per UUID.
//! A file that cannot be parsed is replaced by the next write.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::lock::{FileLock, LockError};

/// Current on-disk format.
pub const SYMBOL_CACHE_VERSION: u32 = 1;

const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Symbol cache errors
#[derive(Debug, Error)]
pub enum SymbolCacheError {
    #[error("symbol cache I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("symbol cache lock: {0}")]
    Lock(#[from] LockError),

    #[error("corrupt symbol cache: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported symbol cache version {0}")]
    Version(u32),
}

/// Result type for symbol cache operations
pub type SymbolCacheResult<T> = Result<T, SymbolCacheError>;

/// One architecture slice of a dSYM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolCacheEntry {
    pub uuid: String,
    pub dsym_path: PathBuf,
    pub architecture: String,
    pub updated_at: DateTime<Utc>,
}

impl SymbolCacheEntry {
    pub fn new(uuid: impl Into<String>, dsym_path: impl Into<PathBuf>, architecture: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            dsym_path: dsym_path.into(),
            architecture: architecture.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Store mapping UUIDs to dSYMs.
pub trait SymbolCache {
    /// Insert `entry`, replacing any row with the same UUID or the same
    /// `(dsym_path, architecture)` pair.
    fn upsert(&self, entry: SymbolCacheEntry) -> SymbolCacheResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<SymbolCacheEntry>,
}

/// JSON file backed [`SymbolCache`].
#[derive(Debug, Clone)]
pub struct JsonSymbolCache {
    path: PathBuf,
}

impl JsonSymbolCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn read(&self) -> SymbolCacheResult<BTreeMap<String, SymbolCacheEntry>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let file: CacheFile = serde_json::from_str(&contents)?;
        if file.version != SYMBOL_CACHE_VERSION {
            return Err(SymbolCacheError::Version(file.version));
        }
        Ok(file
            .entries
            .into_iter()
            .map(|e| (e.uuid.clone(), e))
            .collect())
    }

    fn write(&self, entries: BTreeMap<String, SymbolCacheEntry>) -> SymbolCacheResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = CacheFile {
            version: SYMBOL_CACHE_VERSION,
            entries: entries.into_values().collect(),
        };
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, serde_json::to_vec_pretty(&file)?)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn modify<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, SymbolCacheEntry>) -> T,
    ) -> SymbolCacheResult<T> {
        let _lock = FileLock::acquire(&self.lock_path(), Some(LOCK_TIMEOUT))?;
        let mut entries = match self.read() {
            Ok(entries) => entries,
            Err(e @ (SymbolCacheError::Json(_) | SymbolCacheError::Version(_))) => {
                warn!(path = %self.path.display(), error = %e, "discarding unreadable symbol cache");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        let result = change(&mut entries);
        self.write(entries)?;
        Ok(result)
    }

    /// Every row, ordered by UUID.
    pub fn entries(&self) -> SymbolCacheResult<Vec<SymbolCacheEntry>> {
        Ok(self.read()?.into_values().collect())
    }

    pub fn lookup(&self, uuid: &str) -> SymbolCacheResult<Option<SymbolCacheEntry>> {
        Ok(self.read()?.remove(uuid))
    }

    /// Drop rows whose dSYM no longer exists. Returns how many were removed.
    pub fn prune_missing(&self) -> SymbolCacheResult<usize> {
        let removed = self.modify(|entries| {
            let before = entries.len();
            entries.retain(|_, e| e.dsym_path.is_dir());
            before - entries.len()
        })?;
        debug!(removed, path = %self.path.display(), "pruned symbol cache");
        Ok(removed)
    }
}

impl SymbolCache for JsonSymbolCache {
    fn upsert(&self, entry: SymbolCacheEntry) -> SymbolCacheResult<()> {
        debug!(uuid = %entry.uuid, arch = %entry.architecture, dsym = %entry.dsym_path.display(), "caching dSYM");
        self.modify(|entries| {
            entries.retain(|_, e| {
                !(e.dsym_path == entry.dsym_path && e.architecture == entry.architecture)
            });
            entries.insert(entry.uuid.clone(), entry);
        })
    }
}
