//! # Raw-Socket Server
//!
//! The Votifier TCP listener. One task per connection, one vote per
//! connection:
//!
//! ```text
//! GREETING ─► DETECT ─┬─► V1_READ ────┐
//!                     ├─► V2_READ ────┼─► RESPOND ─► CLOSED
//!                     └─► REJECT_TLS ─┘
//! ```
//!
//! ```text
//! server.rs    accept loop, shutdown and grace period
//! handler.rs   per-connection state machine
//! response.rs  the JSON reply
//! ```
//!
//! Connections share nothing but the processor (keys, tokens) and the
//! dispatcher (store, listeners). The challenge lives on the connection's
//! stack and dies with it.

pub mod handler;
pub mod response;
pub mod server;

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_SOCKET_PORT, MAX_MESSAGE_LENGTH, SHUTDOWN_GRACE_PERIOD, SOCKET_READ_TIMEOUT,
};
use crate::error::VoteError;
use crate::ingest::AcceptedVote;

pub use handler::handle_connection;
pub use response::{ResponseStatus, SocketResponse};
pub use server::{SocketServer, SocketServerHandle};

/// Socket listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketServerConfig {
    pub bind: SocketAddr,
    /// Applies to every individual read and write.
    pub read_timeout: Duration,
    /// Largest V2 message accepted. The wire length field is 16 bits, so
    /// only values below 65536 actually restrict anything.
    pub max_message_length: usize,
    /// How long in-flight connections may run after shutdown is signalled.
    pub shutdown_grace: Duration,
    /// Log hex dumps of undecryptable V1 blocks.
    pub debug: bool,
}

impl Default for SocketServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_SOCKET_PORT)),
            read_timeout: SOCKET_READ_TIMEOUT,
            max_message_length: MAX_MESSAGE_LENGTH,
            shutdown_grace: SHUTDOWN_GRACE_PERIOD,
            debug: false,
        }
    }
}

/// Hooks for connection-level events, e.g. metrics. All no-ops by default.
pub trait ConnectionObserver: Send + Sync {
    fn connection_opened(&self) {}
    fn connection_closed(&self) {}
    fn vote_accepted(&self, _accepted: &AcceptedVote) {}
    fn vote_rejected(&self, _error: &VoteError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}
