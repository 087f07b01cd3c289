//! # Vote Store
//!
//! Remembers when each player last voted, so downstream features can ask
//! "has Alice voted in the last 24 hours?".
//!
//! ```text
//! memory.rs      DashMap-backed, lost on restart
//! persistent.rs  sled-backed, survives restarts
//! cleanup.rs     periodic sweep of expired entries
//! ```
//!
//! Usernames are keyed case-insensitively (lowercased). Recording is a
//! last-write-wins upsert: concurrent votes for the same player may land in
//! any order.
//!
//! ## TTL boundary
//!
//! With `age = now - last_vote`:
//!
//! - `has_voted_recently` holds while `age < ttl`.
//! - `cleanup_expired` removes entries only once `age > ttl`.
//!
//! An entry sitting exactly on the boundary no longer counts as recent but
//! is kept until the next sweep.

pub mod cleanup;
pub mod memory;
pub mod persistent;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{
    now_millis, ttl_millis, DEFAULT_CLEANUP_INTERVAL_HOURS, DEFAULT_STORE_FILE,
    DEFAULT_VOTE_TTL_HOURS,
};

pub use cleanup::{CleanupHandle, CleanupScheduler};
pub use memory::MemoryVoteStore;
pub use persistent::SledVoteStore;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors raised by a vote store backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt entry: {0}")]
    Corrupt(String),

    #[error("unknown storage backend: {0:?} (expected \"memory\" or \"sled\")")]
    UnknownBackend(String),

    #[error("vote store is closed")]
    Closed,
}

pub type StorageResult<T> = Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Store Interface
// ---------------------------------------------------------------------------

/// Per-player last-vote tracker.
///
/// The `*_at` methods take an explicit `now` so expiry can be tested at
/// exact boundaries; the plain forms use the wall clock. Implementations
/// synchronize internally and are shared as `Arc<dyn VoteStore>`.
pub trait VoteStore: Send + Sync + std::fmt::Debug {
    /// Upsert the player's last vote time.
    fn record_vote_at(&self, username: &str, timestamp: i64) -> StorageResult<()>;

    /// Last recorded vote time, if any.
    fn last_vote_timestamp(&self, username: &str) -> StorageResult<Option<i64>>;

    /// Drop every entry strictly older than `ttl_hours` as of `now`.
    /// Returns how many were removed.
    fn cleanup_expired_at(&self, ttl_hours: u32, now: i64) -> StorageResult<usize>;

    /// Number of tracked players.
    fn len(&self) -> StorageResult<usize>;

    /// Flush and release the backend. Further calls may fail with
    /// [`StorageError::Closed`].
    fn close(&self) -> StorageResult<()>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    fn record_vote(&self, username: &str) -> StorageResult<()> {
        self.record_vote_at(username, now_millis())
    }

    fn has_voted_recently_at(&self, username: &str, ttl_hours: u32, now: i64) -> StorageResult<bool> {
        Ok(self
            .last_vote_timestamp(username)?
            .is_some_and(|last| now.saturating_sub(last) < ttl_millis(ttl_hours)))
    }

    fn has_voted_recently(&self, username: &str, ttl_hours: u32) -> StorageResult<bool> {
        self.has_voted_recently_at(username, ttl_hours, now_millis())
    }

    fn cleanup_expired(&self, ttl_hours: u32) -> StorageResult<usize> {
        self.cleanup_expired_at(ttl_hours, now_millis())
    }

    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}

/// Canonical key for a username.
pub(crate) fn normalize_username(username: &str) -> String {
    username.to_lowercase()
}

// ---------------------------------------------------------------------------
// Configuration & Factory
// ---------------------------------------------------------------------------

/// Which backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sled,
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "sled" | "persistent" | "disk" => Ok(Self::Sled),
            other => Err(StorageError::UnknownBackend(other.to_string())),
        }
    }
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Sled => f.write_str("sled"),
        }
    }
}

/// Vote store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database directory for the persistent backend.
    pub path: PathBuf,
    /// How long a vote counts as recent.
    pub ttl_hours: u32,
    /// How often expired entries are swept.
    pub cleanup_interval_hours: u32,
}

impl StorageConfig {
    /// Defaults with the database placed under `data_dir`.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(DEFAULT_STORE_FILE),
            ..Self::default()
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: PathBuf::from(DEFAULT_STORE_FILE),
            ttl_hours: DEFAULT_VOTE_TTL_HOURS,
            cleanup_interval_hours: DEFAULT_CLEANUP_INTERVAL_HOURS,
        }
    }
}

/// Open the configured backend.
pub fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn VoteStore>> {
    let store: Arc<dyn VoteStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryVoteStore::new()),
        StorageBackend::Sled => Arc::new(SledVoteStore::open(&config.path)?),
    };
    tracing::info!(
        backend = store.backend_name(),
        path = %config.path.display(),
        ttl_hours = config.ttl_hours,
        "vote store opened"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_str() {
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert_eq!(" SLED ".parse::<StorageBackend>().unwrap(), StorageBackend::Sled);
        assert_eq!("persistent".parse::<StorageBackend>().unwrap(), StorageBackend::Sled);
        assert!(matches!(
            "mysql".parse::<StorageBackend>(),
            Err(StorageError::UnknownBackend(name)) if name == "mysql"
        ));
    }

    #[test]
    fn config_defaults() {
        let config = StorageConfig::in_dir("/var/lib/votifier");
        assert_eq!(config.backend, StorageBackend::Sled);
        assert_eq!(config.path, PathBuf::from("/var/lib/votifier/votes.db"));
        assert_eq!(config.ttl_hours, 24);
        assert_eq!(config.cleanup_interval_hours, 6);
    }

    #[test]
    fn factory_opens_both_backends() {
        let store = open_store(&StorageConfig {
            backend: StorageBackend::Memory,
            ..StorageConfig::default()
        })
        .unwrap();
        assert_eq!(store.backend_name(), "memory");

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&StorageConfig::in_dir(dir.path())).unwrap();
        assert_eq!(store.backend_name(), "sled");
        store.record_vote("alice").unwrap();
        assert_eq!(store.len().unwrap(), 1);
        store.close().unwrap();
    }

    /// Behavior every backend must share. Each backend's tests call this.
    pub(crate) fn exercise_store_contract(store: &dyn VoteStore) {
        const HOUR: i64 = 3_600_000;
        let now = 1_700_000_000_000;

        assert!(store.is_empty().unwrap());
        assert_eq!(store.last_vote_timestamp("nobody").unwrap(), None);
        assert!(!store.has_voted_recently_at("nobody", 24, now).unwrap());

        // Case-insensitive keys, last write wins.
        store.record_vote_at("Alice", now - 2 * HOUR).unwrap();
        store.record_vote_at("ALICE", now - HOUR).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.last_vote_timestamp("alice").unwrap(), Some(now - HOUR));

        // Boundary: recent strictly inside the window.
        store.record_vote_at("bob", now - 24 * HOUR).unwrap();
        assert!(!store.has_voted_recently_at("bob", 24, now).unwrap());
        assert!(store.has_voted_recently_at("bob", 24, now - 1).unwrap());
        assert!(store.has_voted_recently_at("alice", 24, now).unwrap());

        // Cleanup: only strictly older than the TTL goes.
        store.record_vote_at("carol", now - 24 * HOUR - 1).unwrap();
        store.record_vote_at("dave", now - 48 * HOUR).unwrap();
        assert_eq!(store.len().unwrap(), 4);

        assert_eq!(store.cleanup_expired_at(24, now).unwrap(), 2);
        assert_eq!(store.cleanup_expired_at(24, now).unwrap(), 0);
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.last_vote_timestamp("bob").unwrap(), Some(now - 24 * HOUR));
        assert_eq!(store.last_vote_timestamp("carol").unwrap(), None);
        assert_eq!(store.last_vote_timestamp("dave").unwrap(), None);

        // A re-vote moves the entry out of the expiry range.
        store.record_vote_at("bob", now).unwrap();
        assert_eq!(store.cleanup_expired_at(24, now + HOUR).unwrap(), 0);
        assert_eq!(store.last_vote_timestamp("Bob").unwrap(), Some(now));
    }
}
