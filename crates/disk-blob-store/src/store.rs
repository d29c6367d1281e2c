//! Flat-directory blob storage with vacuum reclamation

use crate::error::{Result, StoreError};
use crate::types::{CacheBudget, CacheKey, StoreStats, VacuumMode};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Durable blob store rooted at a single cache directory.
///
/// The store is the source of truth across process restarts. It keeps no
/// index: every file in the root directory is one entry, named by the
/// percent-encoded cache key, and vacuum decisions are made from file
/// metadata alone.
pub struct DiskStore {
    root: PathBuf,
    budget: RwLock<CacheBudget>,
    /// Serializes whole vacuum passes. Reads and writes do not take it:
    /// a read racing a delete is a miss, a write racing a pass resolves
    /// as last-filesystem-operation-wins.
    vacuum_gate: Mutex<()>,
}

/// Metadata snapshot taken while walking the directory.
struct FileInfo {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl DiskStore {
    /// Create a store handle rooted at `root`.
    ///
    /// No filesystem access happens until [`DiskStore::init`].
    pub fn new(root: impl Into<PathBuf>, budget: CacheBudget) -> Self {
        Self {
            root: root.into(),
            budget: RwLock::new(budget),
            vacuum_gate: Mutex::new(()),
        }
    }

    /// Ensure the cache directory exists, then run a full vacuum pass.
    ///
    /// An already-existing directory is fine; failing to establish one is
    /// fatal to the store and surfaces as [`StoreError::Unavailable`].
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Unavailable(Box::new(e)))?;
        self.vacuum(VacuumMode::FULL).await;
        Ok(())
    }

    /// Path of the cache directory this store owns.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Store `bytes` under `key`, replacing any previous content.
    ///
    /// Empty payloads and keys with no file-name encoding are silent
    /// no-ops, so at most one file ever exists per key. A write landing
    /// during a vacuum pass may be reclaimed by that same pass if it blows
    /// the budget again; callers must not assume otherwise.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let Some(path) = self.entry_path(key) else {
            return Ok(());
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Write(Box::new(e))),
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::Write(Box::new(e)))?;

        debug!(key = %key, size = bytes.len(), "stored blob");
        Ok(())
    }

    /// Read the blob stored under `key`, if any.
    ///
    /// Missing files and un-encodable keys are both misses, never errors.
    pub async fn read(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.entry_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(key = %key, size = bytes.len(), "disk hit");
                Some(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key = %key, error = %e, "blob read failed, treating as miss");
                None
            }
        }
    }

    /// Reclaim disk space according to `mode`.
    ///
    /// One walk over the cache directory: files idle past the budget's age
    /// limit are deleted as they are encountered and never counted toward
    /// the size total; the survivors are then trimmed oldest-modified-first
    /// until the byte budget holds. Individual metadata or delete failures
    /// are logged and the pass continues best-effort. Two passes on the
    /// same store never interleave their decisions.
    ///
    /// [`DiskStore::init`] runs this once; any recurring schedule (a timer,
    /// a memory-pressure hook) belongs to the caller.
    pub async fn vacuum(&self, mode: VacuumMode) {
        let _gate = self.vacuum_gate.lock().await;
        let budget = self.budget.read().await.clone();
        let now = SystemTime::now();

        debug!(root = %self.root.display(), ?mode, "vacuum pass starting");

        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "vacuum cannot enumerate cache directory");
                return;
            }
        };

        let mut candidates = Vec::new();
        let mut total_bytes = 0u64;

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "vacuum enumeration failed mid-pass");
                    break;
                }
            };
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping entry with unreadable metadata");
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            let modified = match meta.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping entry with no modification time");
                    continue;
                }
            };

            let idle = now.duration_since(modified).unwrap_or_default();
            if mode.contains(VacuumMode::BY_AGE) && idle > budget.max_idle_age {
                debug!(path = %path.display(), idle_secs = idle.as_secs(), "age limit hit, removing");
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "failed to remove expired blob");
                }
            } else if mode.contains(VacuumMode::BY_SIZE) {
                total_bytes += meta.len();
                candidates.push(FileInfo {
                    path,
                    size: meta.len(),
                    modified,
                });
            }
        }

        if mode.contains(VacuumMode::BY_SIZE) && total_bytes > budget.max_total_bytes {
            candidates.sort_by_key(|file| file.modified);

            for file in candidates {
                debug!(path = %file.path.display(), size = file.size, "size limit hit, removing");
                match tokio::fs::remove_file(&file.path).await {
                    Ok(()) => total_bytes -= file.size,
                    Err(e) => {
                        warn!(path = %file.path.display(), error = %e, "failed to remove blob");
                    }
                }
                if total_bytes <= budget.max_total_bytes {
                    break;
                }
            }
        }
    }

    /// Count the files and bytes currently on disk.
    pub async fn stats(&self) -> StoreStats {
        let mut stats = StoreStats::default();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(_) => return stats,
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            if let Ok(meta) = entry.metadata().await {
                if meta.is_file() {
                    stats.entries += 1;
                    stats.total_bytes += meta.len();
                }
            }
        }
        stats
    }

    /// Current reclamation limits.
    pub async fn budget(&self) -> CacheBudget {
        self.budget.read().await.clone()
    }

    /// Replace the reclamation limits; takes effect on the next pass.
    pub async fn set_budget(&self, budget: CacheBudget) {
        *self.budget.write().await = budget;
    }

    fn entry_path(&self, key: &CacheKey) -> Option<PathBuf> {
        key.file_name().map(|name| self.root.join(name))
    }
}
