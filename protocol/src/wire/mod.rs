//! # Wire Protocols
//!
//! The two payload formats a voting site can send, plus the cheap sniff
//! that tells them apart.
//!
//! ```text
//!   raw payload ──► detect ──┬─► Legacy (V1) ─► base64 ─► RSA ─► "VOTE\n..." ─┐
//!                            │                                              ├─► Vote
//!                            └─► Modern (V2) ─► JSON ─► token ─► HMAC ───────┘
//! ```
//!
//! ## Legacy (V1)
//! A 256-byte RSA block (base64 over HTTP, raw over the socket) holding
//! newline-separated `VOTE`, service, username, address, timestamp.
//!
//! ## Modern (V2)
//! `{"payload": "<json string>", "signature": "<base64 hmac>"}`. The HMAC
//! covers the payload string exactly as received, keyed by the token
//! configured for the payload's `serviceName`.

pub mod detect;
pub mod legacy;
pub mod modern;
pub mod tokens;

pub use detect::{detect, Protocol};
pub use modern::ModernEnvelope;
pub use tokens::{ServiceTokenTable, TokenSpecError};
