//! Hand-off of accepted votes to the rest of the server.
//!
//! [`Dispatcher::dispatch`] records the vote in the vote store and then
//! calls every registered [`VoteListener`] once, in registration order.
//! Listeners run on the connection's task: they must return quickly and
//! push any slow work (rewards, announcements) onto a channel.
//!
//! A store failure does not un-accept a vote that already passed its
//! cryptographic checks. Listeners are still notified and the failure is
//! returned for the caller to log.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{StorageError, VoteStore};
use crate::vote::Vote;
use crate::wire::Protocol;

/// How a vote reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Socket,
    /// Synthetic votes from the test endpoint or tooling.
    Test,
}

impl Transport {
    pub fn label(self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::Socket => "socket",
            Transport::Test => "test",
        }
    }
}

/// Where an accepted vote came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteSource {
    pub protocol: Protocol,
    pub transport: Transport,
    pub remote: Option<SocketAddr>,
}

impl VoteSource {
    pub fn new(protocol: Protocol, transport: Transport, remote: Option<SocketAddr>) -> Self {
        Self {
            protocol,
            transport,
            remote,
        }
    }
}

/// Receiver of accepted votes.
pub trait VoteListener: Send + Sync {
    fn on_vote(&self, vote: &Vote, source: &VoteSource);

    /// Name for logs.
    fn name(&self) -> &str {
        "listener"
    }
}

/// Records votes and fans them out to listeners.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn VoteStore>,
    listeners: Vec<Arc<dyn VoteListener>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self {
            store,
            listeners: Vec::new(),
        }
    }

    /// Add a listener. Builder form for wiring at startup.
    pub fn with_listener(mut self, listener: Arc<dyn VoteListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn register(&mut self, listener: Arc<dyn VoteListener>) {
        self.listeners.push(listener);
    }

    pub fn store(&self) -> &Arc<dyn VoteStore> {
        &self.store
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Record `vote` under its username and timestamp, then notify every
    /// listener exactly once.
    pub fn dispatch(&self, vote: &Vote, source: &VoteSource) -> Result<(), StorageError> {
        let recorded = self.store.record_vote_at(vote.username(), vote.timestamp());
        if let Err(e) = &recorded {
            warn!(
                username = vote.username(),
                backend = self.store.backend_name(),
                error = %e,
                "failed to record vote; notifying listeners anyway"
            );
        }

        for listener in &self.listeners {
            listener.on_vote(vote, source);
        }
        recorded
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("store", &self.store.backend_name())
            .field("listeners", &self.listeners.iter().map(|l| l.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::storage::{MemoryVoteStore, SledVoteStore};

    /// Listener that remembers everything it saw.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub seen: Mutex<Vec<(Vote, VoteSource)>>,
    }

    impl VoteListener for Recorder {
        fn on_vote(&self, vote: &Vote, source: &VoteSource) {
            self.seen.lock().push((vote.clone(), *source));
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn vote() -> Vote {
        Vote::new("Hyvote", "Alice", "1.2.3.4", 1_700_000_000_000).unwrap()
    }

    #[test]
    fn records_then_notifies_each_listener_once() {
        let store: Arc<dyn VoteStore> = Arc::new(MemoryVoteStore::new());
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(Arc::clone(&store))
            .with_listener(first.clone())
            .with_listener(second.clone());

        let source = VoteSource::new(Protocol::Legacy, Transport::Socket, None);
        dispatcher.dispatch(&vote(), &source).unwrap();

        assert_eq!(store.last_vote_timestamp("alice").unwrap(), Some(1_700_000_000_000));
        assert_eq!(first.seen.lock().len(), 1);
        assert_eq!(second.seen.lock().len(), 1);
        assert_eq!(first.seen.lock()[0].1, source);
    }

    #[test]
    fn store_failure_still_notifies() {
        let sled = SledVoteStore::open_temporary().unwrap();
        sled.close().unwrap();
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(Arc::new(sled)).with_listener(recorder.clone());

        let source = VoteSource::new(Protocol::Modern, Transport::Http, None);
        assert!(matches!(
            dispatcher.dispatch(&vote(), &source),
            Err(StorageError::Closed)
        ));
        assert_eq!(recorder.seen.lock().len(), 1);
    }
}
