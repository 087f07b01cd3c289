//! # Sled Vote Store
//!
//! Last-vote timestamps on disk, so "voted recently" survives restarts.
//!
//! ## Tree Layout
//!
//! | Tree            | Key                          | Value            |
//! |-----------------|------------------------------|------------------|
//! | `votes`         | username (lowercased UTF-8)  | millis (8B BE)   |
//! | `votes_by_time` | sortable millis (8B) ‖ name  | empty            |
//!
//! `votes` is the table, `votes_by_time` its timestamp index. Both are
//! updated in one sled transaction so the index never points at a stale
//! row. The sweep range-scans the index up to the cutoff and never walks
//! live entries.
//!
//! Index timestamps are stored with the sign bit flipped so that sled's
//! lexicographic order matches numeric order for negative values too.

use std::path::Path;

use parking_lot::RwLock;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::debug;

use super::{normalize_username, StorageError, StorageResult, VoteStore};
use crate::config::ttl_millis;

const VOTES_TREE: &str = "votes";
const VOTES_BY_TIME_TREE: &str = "votes_by_time";

#[derive(Debug)]
struct Handles {
    db: Db,
    votes: Tree,
    by_time: Tree,
}

/// Persistent vote store over an embedded sled database.
#[derive(Debug)]
pub struct SledVoteStore {
    handles: RwLock<Option<Handles>>,
}

impl SledVoteStore {
    /// Open or create the database directory at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_db(sled::open(path)?)
    }

    /// A throwaway database removed on drop. For tests.
    pub fn open_temporary() -> StorageResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        let votes = db.open_tree(VOTES_TREE)?;
        let by_time = db.open_tree(VOTES_BY_TIME_TREE)?;
        Ok(Self {
            handles: RwLock::new(Some(Handles { db, votes, by_time })),
        })
    }

    fn with_handles<T>(&self, f: impl FnOnce(&Handles) -> StorageResult<T>) -> StorageResult<T> {
        let guard = self.handles.read();
        let handles = guard.as_ref().ok_or(StorageError::Closed)?;
        f(handles)
    }

    /// Remove one expired index entry, and the row it points at if the row
    /// still carries that timestamp. Returns whether a row went.
    fn expire(handles: &Handles, index_key: &[u8]) -> StorageResult<bool> {
        let Some(username) = index_key.get(8..) else {
            return Err(StorageError::Corrupt("index key shorter than 8 bytes".into()));
        };
        let indexed = decode_index_millis(index_key)?;

        (&handles.votes, &handles.by_time)
            .transaction(|(votes, by_time)| {
                by_time.remove(index_key)?;
                let current = votes.get(username)?;
                match current {
                    Some(value) => {
                        let current = decode_millis(&value)
                            .map_err(ConflictableTransactionError::Abort)?;
                        if current == indexed {
                            votes.remove(username)?;
                            Ok(true)
                        } else {
                            Ok(false)
                        }
                    }
                    None => Ok(false),
                }
            })
            .map_err(from_transaction_error)
    }
}

impl VoteStore for SledVoteStore {
    fn record_vote_at(&self, username: &str, timestamp: i64) -> StorageResult<()> {
        let key = normalize_username(username);
        self.with_handles(|h| {
            (&h.votes, &h.by_time)
                .transaction(|(votes, by_time)| {
                    let previous = votes.insert(key.as_bytes(), timestamp.to_be_bytes().to_vec())?;
                    if let Some(previous) = previous {
                        let previous = decode_millis(&previous)
                            .map_err(ConflictableTransactionError::Abort)?;
                        by_time.remove(index_key(previous, &key))?;
                    }
                    by_time.insert(index_key(timestamp, &key), Vec::<u8>::new())?;
                    Ok(())
                })
                .map_err(from_transaction_error)
        })
    }

    fn last_vote_timestamp(&self, username: &str) -> StorageResult<Option<i64>> {
        let key = normalize_username(username);
        self.with_handles(|h| {
            h.votes
                .get(key.as_bytes())?
                .map(|value| decode_millis(&value))
                .transpose()
        })
    }

    fn cleanup_expired_at(&self, ttl_hours: u32, now: i64) -> StorageResult<usize> {
        let cutoff = now.saturating_sub(ttl_millis(ttl_hours));
        self.with_handles(|h| {
            // Keys below the bare cutoff prefix are exactly ts < cutoff.
            let expired: Vec<sled::IVec> = h
                .by_time
                .range(..sortable_millis(cutoff).to_vec())
                .keys()
                .collect::<Result<_, _>>()?;

            let mut removed = 0;
            for key in &expired {
                if Self::expire(h, key)? {
                    removed += 1;
                }
            }
            if removed > 0 {
                h.db.flush()?;
            }
            debug!(scanned = expired.len(), removed, "sled sweep finished");
            Ok(removed)
        })
    }

    fn len(&self) -> StorageResult<usize> {
        self.with_handles(|h| Ok(h.votes.len()))
    }

    fn close(&self) -> StorageResult<()> {
        let Some(handles) = self.handles.write().take() else {
            return Ok(());
        };
        handles.db.flush()?;
        debug!("sled vote store closed");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

fn sortable_millis(millis: i64) -> [u8; 8] {
    ((millis as u64) ^ (1 << 63)).to_be_bytes()
}

fn index_key(millis: i64, username: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + username.len());
    key.extend_from_slice(&sortable_millis(millis));
    key.extend_from_slice(username.as_bytes());
    key
}

fn decode_millis(bytes: &[u8]) -> StorageResult<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Corrupt(format!("timestamp of {} bytes", bytes.len())))?;
    Ok(i64::from_be_bytes(raw))
}

fn decode_index_millis(key: &[u8]) -> StorageResult<i64> {
    let raw: [u8; 8] = key
        .get(..8)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or_else(|| StorageError::Corrupt("index key shorter than 8 bytes".into()))?;
    Ok((u64::from_be_bytes(raw) ^ (1 << 63)) as i64)
}

fn from_transaction_error(err: TransactionError<StorageError>) -> StorageError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StorageError::Sled(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::exercise_store_contract;

    #[test]
    fn satisfies_store_contract() {
        exercise_store_contract(&SledVoteStore::open_temporary().unwrap());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("votes.db");

        let store = SledVoteStore::open(&path).unwrap();
        store.record_vote_at("Alice", 1_700_000_000_000).unwrap();
        store.close().unwrap();
        drop(store);

        let store = SledVoteStore::open(&path).unwrap();
        assert_eq!(
            store.last_vote_timestamp("alice").unwrap(),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn closed_store_refuses_work() {
        let store = SledVoteStore::open_temporary().unwrap();
        store.close().unwrap();
        assert!(matches!(store.record_vote("alice"), Err(StorageError::Closed)));
        assert!(matches!(store.len(), Err(StorageError::Closed)));
        // Closing twice is harmless.
        store.close().unwrap();
    }

    #[test]
    fn index_follows_upserts() {
        let store = SledVoteStore::open_temporary().unwrap();
        store.record_vote_at("alice", 10).unwrap();
        store.record_vote_at("alice", 20).unwrap();
        store.record_vote_at("alice", 30).unwrap();

        let index_len = store.with_handles(|h| Ok(h.by_time.len())).unwrap();
        assert_eq!(index_len, 1);
    }

    #[test]
    fn sortable_millis_orders_negatives() {
        assert!(sortable_millis(-1) < sortable_millis(0));
        assert!(sortable_millis(0) < sortable_millis(1));
        assert!(sortable_millis(i64::MIN) < sortable_millis(i64::MAX));
        let key = index_key(-42, "bob");
        assert_eq!(decode_index_millis(&key).unwrap(), -42);
    }
}
