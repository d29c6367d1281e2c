//! Store configuration and bookkeeping types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Longest encoded file name accepted by mainstream filesystems.
const MAX_FILE_NAME_BYTES: usize = 255;

/// Identifies one cached blob.
///
/// Callers derive the key deterministically from a source URL plus an
/// optional transform descriptor, so two renditions of the same source
/// occupy distinct slots in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(raw: impl Into<String>) -> Self {
        CacheKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name this key maps to inside the cache directory.
    ///
    /// The key is percent-encoded so it is always a single path component.
    /// Returns `None` for keys the store cannot represent: the empty key,
    /// and keys whose encoded form exceeds the file name length limit.
    /// Such keys read as misses and write as no-ops.
    pub fn file_name(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        let encoded = urlencoding::encode(&self.0);
        if encoded.len() > MAX_FILE_NAME_BYTES {
            return None;
        }
        Some(encoded.into_owned())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        CacheKey::new(raw)
    }
}

/// Reclamation limits enforced by a vacuum pass.
///
/// Runtime configuration, not per-entry state; a live store can swap its
/// budget between passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheBudget {
    /// Total bytes the store may hold before size-based trimming kicks in.
    pub max_total_bytes: u64,
    /// How long a file may go unmodified before age-based removal.
    pub max_idle_age: Duration,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self {
            max_total_bytes: 500 * 1024 * 1024, // 500 MiB
            max_idle_age: Duration::from_secs(5 * 24 * 60 * 60), // 5 days
        }
    }
}

/// Selects which filters a vacuum pass applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacuumMode(u8);

impl VacuumMode {
    /// Remove files idle longer than the budget allows.
    pub const BY_AGE: VacuumMode = VacuumMode(1);
    /// Trim oldest files until the store fits the byte budget.
    pub const BY_SIZE: VacuumMode = VacuumMode(1 << 1);
    /// Both filters in a single pass.
    pub const FULL: VacuumMode = VacuumMode(Self::BY_AGE.0 | Self::BY_SIZE.0);

    pub fn contains(self, other: VacuumMode) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Point-in-time view of the store directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub entries: usize,
    pub total_bytes: u64,
}
