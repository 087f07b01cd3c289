// Copyright (c) 2026 Hyvote Contributors. MIT License.
// See LICENSE for details.

//! # Votifier Protocol Core Library
//!
//! Everything a game server needs to receive vote notifications from
//! voting sites, minus the HTTP surface and the process wiring (those live
//! in `votifier-node`).
//!
//! Two wire formats are spoken. The legacy one (V1) is a 256-byte RSA block
//! and is what most sites still send. The modern one (V2) is an
//! HMAC-signed JSON envelope keyed by a per-site token. Both are accepted
//! over a raw TCP socket and over HTTP; both produce the same [`Vote`].
//!
//! ## Architecture
//!
//! - **config**: Protocol constants and defaults.
//! - **vote**: The validated vote record.
//! - **error**: One error enum for every way a submission is refused.
//! - **crypto**: RSA key store and decryption, HMAC, per-connection challenges.
//! - **wire**: Protocol detection and the V1/V2 parsers.
//! - **ingest**: Shared entry point: detect, gate, decrypt or verify.
//! - **dispatch**: Records accepted votes and notifies listeners.
//! - **socket**: The TCP listener and its per-connection state machine.
//! - **storage**: Last-vote timestamps per player, in memory or on disk.
//!
//! ## Ground Rules
//!
//! 1. A rejected vote never takes anything else down with it.
//! 2. Secrets and key material never reach a log line or a response.
//! 3. Comparisons against secrets are constant-time.

pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod socket;
pub mod storage;
pub mod vote;
pub mod wire;

pub use crypto::{Challenge, KeyStore};
pub use dispatch::{Dispatcher, Transport, VoteListener, VoteSource};
pub use error::VoteError;
pub use ingest::{AcceptedVote, ProtocolToggles, VoteProcessor};
pub use socket::{SocketServer, SocketServerConfig, SocketServerHandle};
pub use storage::{open_store, StorageBackend, StorageConfig, StorageError, VoteStore};
pub use vote::Vote;
pub use wire::{Protocol, ServiceTokenTable};
