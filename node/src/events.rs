//! # Vote Events
//!
//! Accepted votes leave the dispatcher as [`VoteEvent`]s on a
//! `tokio::sync::broadcast` channel. Reward handlers, announcers and other
//! consumers subscribe to the channel; a slow consumer lags and skips
//! events rather than holding up vote ingestion.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use votifier_protocol::{Protocol, Transport, Vote, VoteListener, VoteSource};

/// Broadcast channel capacity. Absorbs bursts from a vote-site retry storm
/// without dropping events for a consumer that is briefly busy.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One accepted vote, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEvent {
    pub vote: Vote,
    pub protocol: Protocol,
    pub transport: Transport,
    pub remote: Option<SocketAddr>,
    /// Server clock when the vote was dispatched, epoch millis.
    pub received_at: i64,
}

impl VoteEvent {
    pub fn new(vote: &Vote, source: &VoteSource) -> Self {
        Self {
            vote: vote.clone(),
            protocol: source.protocol,
            transport: source.transport,
            remote: source.remote,
            received_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Publishes every dispatched vote on the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<VoteEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoteEvent> {
        self.tx.subscribe()
    }
}

impl VoteListener for EventPublisher {
    fn on_vote(&self, vote: &Vote, source: &VoteSource) {
        // No subscribers is not an error.
        let _ = self.tx.send(VoteEvent::new(vote, source));
    }

    fn name(&self) -> &str {
        "event-publisher"
    }
}

/// Log every event at `info` until the channel closes.
pub fn spawn_event_logger(mut rx: broadcast::Receiver<VoteEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::info!(
                    service = event.vote.service_name(),
                    username = event.vote.username(),
                    address = event.vote.address(),
                    timestamp = event.vote.timestamp(),
                    protocol = %event.protocol,
                    transport = event.transport.label(),
                    remote = ?event.remote,
                    "vote received"
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "vote event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
