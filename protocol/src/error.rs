//! Error taxonomy for vote submissions.
//!
//! Every way a single submission can be turned away maps to one
//! [`VoteError`] variant. They are all local to one request or connection:
//! the caller answers the sender, logs, and moves on.
//!
//! Two renderings exist on purpose. `Display` carries the detail the
//! operator needs in the server log. [`VoteError::public_message`] is what
//! goes back over the wire and never includes internals.

use thiserror::Error;

use crate::crypto::keys::KeyError;
use crate::storage::StorageError;
use crate::wire::Protocol;

/// A rejected vote submission.
#[derive(Debug, Error)]
pub enum VoteError {
    /// The request carried no payload at all.
    #[error("empty payload")]
    EmptyPayload,

    /// The payload could not be classified as either protocol.
    #[error("unable to detect vote protocol")]
    UnknownProtocol,

    /// The payload decoded but its structure or fields are invalid.
    #[error("{protocol} parse error: {message}")]
    Parse {
        /// Which parser rejected it.
        protocol: Protocol,
        /// What was wrong.
        message: String,
    },

    /// Legacy RSA decryption failed. The cause is deliberately not kept.
    #[error("decryption failed")]
    Decryption,

    /// Modern HMAC verification failed or no secret is configured.
    #[error("signature error: {0}")]
    Signature(String),

    /// Modern challenge missing or not the one issued on this connection.
    #[error("challenge error: {0}")]
    Challenge(String),

    /// The submission exceeded the size bound before parsing started.
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge {
        /// The bound that was crossed.
        limit: usize,
    },

    /// Bad socket framing: an impossible length or an unsupported prefix.
    #[error("invalid framing: {0}")]
    InvalidFraming(String),

    /// The detected protocol is administratively disabled.
    #[error("{0} protocol is disabled")]
    ProtocolDisabled(Protocol),

    /// The vote store failed while recording an accepted vote.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The key store could not provide key material.
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// Anything else, e.g. I/O while reading the request body.
    #[error("internal error: {0}")]
    Internal(String),
}

impl VoteError {
    /// Shorthand for a [`VoteError::Parse`].
    pub fn parse(protocol: Protocol, message: impl Into<String>) -> Self {
        Self::Parse {
            protocol,
            message: message.into(),
        }
    }

    /// The message returned to the sender.
    ///
    /// Parse errors include their field-level message since sites rely on
    /// it to debug their integration; nothing else leaks detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::EmptyPayload => "Empty payload".to_string(),
            Self::UnknownProtocol => "Unable to detect vote protocol".to_string(),
            Self::Parse { message, .. } => format!("Invalid vote format: {message}"),
            Self::Decryption => "Decryption failed".to_string(),
            Self::Signature(_) => "Signature verification failed".to_string(),
            Self::Challenge(_) => "Challenge verification failed".to_string(),
            Self::PayloadTooLarge { .. } => "Request body too large".to_string(),
            Self::InvalidFraming(message) => message.clone(),
            Self::ProtocolDisabled(protocol) => format!("{protocol} protocol is disabled"),
            Self::Storage(_) | Self::Key(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
        }
    }

    /// Short stable label, used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyPayload => "empty_payload",
            Self::UnknownProtocol => "unknown_protocol",
            Self::Parse { .. } => "parse",
            Self::Decryption => "decryption",
            Self::Signature(_) => "signature",
            Self::Challenge(_) => "challenge",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::InvalidFraming(_) => "invalid_framing",
            Self::ProtocolDisabled(_) => "protocol_disabled",
            Self::Storage(_) => "storage",
            Self::Key(_) => "key",
            Self::Internal(_) => "internal",
        }
    }
}
