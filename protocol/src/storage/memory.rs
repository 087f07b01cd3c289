//! In-memory vote store. Everything is lost on restart, which is fine for
//! servers that only care about the current session.

use dashmap::DashMap;

use super::{normalize_username, StorageResult, VoteStore};
use crate::config::ttl_millis;

/// Concurrent map of lowercased username to last-vote millis.
#[derive(Debug, Default)]
pub struct MemoryVoteStore {
    votes: DashMap<String, i64>,
}

impl MemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VoteStore for MemoryVoteStore {
    fn record_vote_at(&self, username: &str, timestamp: i64) -> StorageResult<()> {
        self.votes.insert(normalize_username(username), timestamp);
        Ok(())
    }

    fn last_vote_timestamp(&self, username: &str) -> StorageResult<Option<i64>> {
        Ok(self
            .votes
            .get(&normalize_username(username))
            .map(|entry| *entry.value()))
    }

    fn cleanup_expired_at(&self, ttl_hours: u32, now: i64) -> StorageResult<usize> {
        let ttl = ttl_millis(ttl_hours);
        let mut removed = 0;
        self.votes.retain(|_, last| {
            let keep = now.saturating_sub(*last) <= ttl;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.votes.len())
    }

    /// Nothing to flush or release; entries stay readable.
    fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
