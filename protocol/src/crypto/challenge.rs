//! Per-connection challenge for the modern socket protocol.
//!
//! The server sends a fresh challenge in its greeting and the sender must
//! echo it inside the signed payload. A captured vote therefore can't be
//! replayed on another connection.
//!
//! [`Challenge`] is neither `Clone` nor `Copy`. It is created by the
//! connection handler, borrowed by the parser, and dropped with the
//! connection.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::CHALLENGE_BYTES;
use crate::crypto::mac::constant_time_eq;

/// A single-use random challenge, base64-encoded.
#[derive(Debug, PartialEq, Eq)]
pub struct Challenge(String);

impl Challenge {
    /// Draw 24 bytes from the OS CSPRNG and encode them.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CHALLENGE_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(STANDARD.encode(bytes))
    }

    /// The encoded challenge as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `candidate` is exactly this challenge.
    pub fn matches(&self, candidate: &str) -> bool {
        constant_time_eq(self.0.as_bytes(), candidate.as_bytes())
    }
}

impl std::fmt::Display for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
