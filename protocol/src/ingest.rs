//! # Vote Ingestion
//!
//! The one place a payload turns into an [`AcceptedVote`] or a
//! [`VoteError`]. The socket handler and the HTTP adapter both come
//! through here, so protocol toggles, key access and parser selection
//! behave identically on both transports. The only difference is the
//! challenge: the socket passes the one it issued, HTTP passes none.
//!
//! HTTP bodies are read through [`BodyLimit`], which refuses to buffer
//! more than the configured bound.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::crypto::{Challenge, KeyStore};
use crate::error::VoteError;
use crate::vote::Vote;
use crate::wire::{detect, legacy, modern, Protocol, ServiceTokenTable};

/// Which protocols are administratively enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolToggles {
    pub legacy_enabled: bool,
    pub modern_enabled: bool,
}

impl Default for ProtocolToggles {
    fn default() -> Self {
        Self {
            legacy_enabled: true,
            modern_enabled: true,
        }
    }
}

impl ProtocolToggles {
    pub fn is_enabled(&self, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Legacy => self.legacy_enabled,
            Protocol::Modern => self.modern_enabled,
            Protocol::Unknown => false,
        }
    }

    fn ensure_enabled(&self, protocol: Protocol) -> Result<(), VoteError> {
        if self.is_enabled(protocol) {
            Ok(())
        } else {
            Err(VoteError::ProtocolDisabled(protocol))
        }
    }
}

/// A vote that passed every check, with the protocol it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedVote {
    pub vote: Vote,
    pub protocol: Protocol,
}

/// Stateless vote processing over shared keys and tokens.
///
/// Cheap to clone; every clone shares the same key store and token table.
#[derive(Debug, Clone)]
pub struct VoteProcessor {
    keys: Arc<KeyStore>,
    tokens: Arc<ServiceTokenTable>,
    toggles: ProtocolToggles,
}

impl VoteProcessor {
    pub fn new(keys: Arc<KeyStore>, tokens: Arc<ServiceTokenTable>, toggles: ProtocolToggles) -> Self {
        Self {
            keys,
            tokens,
            toggles,
        }
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn tokens(&self) -> &ServiceTokenTable {
        &self.tokens
    }

    pub fn toggles(&self) -> ProtocolToggles {
        self.toggles
    }

    /// Whether a modern vote can succeed at all: enabled and at least one
    /// service token configured.
    pub fn modern_available(&self) -> bool {
        self.toggles.modern_enabled && !self.tokens.is_empty()
    }

    /// Process a textual payload as received over HTTP. No challenge is
    /// checked.
    pub fn process_payload(&self, payload: &str) -> Result<AcceptedVote, VoteError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(VoteError::EmptyPayload);
        }

        match detect(payload) {
            Protocol::Legacy => {
                self.toggles.ensure_enabled(Protocol::Legacy)?;
                let vote = legacy::decode_and_decrypt(payload, self.keys.private_key()?)?;
                Ok(AcceptedVote {
                    vote,
                    protocol: Protocol::Legacy,
                })
            }
            Protocol::Modern => self.process_modern_envelope(payload, None),
            Protocol::Unknown => Err(VoteError::UnknownProtocol),
        }
    }

    /// Process a raw 256-byte legacy block read off the socket.
    pub fn process_legacy_block(&self, block: &[u8]) -> Result<AcceptedVote, VoteError> {
        self.toggles.ensure_enabled(Protocol::Legacy)?;
        let vote = legacy::decrypt_block(block, self.keys.private_key()?)?;
        Ok(AcceptedVote {
            vote,
            protocol: Protocol::Legacy,
        })
    }

    /// Process a modern envelope. The socket passes the challenge it sent
    /// in its greeting; HTTP passes `None`.
    pub fn process_modern_envelope(
        &self,
        json: &str,
        challenge: Option<&Challenge>,
    ) -> Result<AcceptedVote, VoteError> {
        self.toggles.ensure_enabled(Protocol::Modern)?;
        let vote = modern::parse(json, &self.tokens, challenge)?;
        Ok(AcceptedVote {
            vote,
            protocol: Protocol::Modern,
        })
    }

    /// Read a bounded body and process it.
    pub async fn process_reader<R>(&self, reader: R, limit: usize) -> Result<AcceptedVote, VoteError>
    where
        R: AsyncRead + Unpin,
    {
        let body = read_bounded_body(reader, limit).await?;
        self.process_payload(&String::from_utf8_lossy(&body))
    }
}

/// Incremental body accumulator that fails once more than `limit` bytes
/// have been offered.
#[derive(Debug)]
pub struct BodyLimit {
    buf: Vec<u8>,
    limit: usize,
}

impl BodyLimit {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Append a chunk. Nothing past `limit + 1` bytes is ever buffered.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), VoteError> {
        let room = (self.limit + 1).saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if self.buf.len() > self.limit {
            return Err(VoteError::PayloadTooLarge { limit: self.limit });
        }
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Read at most `limit` bytes. Reading byte `limit + 1` fails with
/// [`VoteError::PayloadTooLarge`] before anything is parsed.
pub async fn read_bounded_body<R>(reader: R, limit: usize) -> Result<Vec<u8>, VoteError>
where
    R: AsyncRead + Unpin,
{
    let mut body = BodyLimit::new(limit);
    let mut buf = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| VoteError::Internal(format!("failed to read request body: {e}")))?;
    body.push(&buf)?;
    Ok(body.into_bytes())
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde_json::json;

    use super::*;
    use crate::config::MAX_HTTP_BODY_BYTES;
    use crate::test_support::test_key_store;
    use crate::wire::ModernEnvelope;

    const SECRET: &str = "hyvote-secret";

    fn processor(toggles: ProtocolToggles) -> VoteProcessor {
        let tokens: ServiceTokenTable = [("Hyvote", SECRET)].into_iter().collect();
        VoteProcessor::new(Arc::new(test_key_store()), Arc::new(tokens), toggles)
    }

    fn legacy_payload(keys: &KeyStore) -> String {
        let vote = Vote::new("Hyvote", "Alice", "1.2.3.4", 1_700_000_000_000).unwrap();
        let block = legacy::encrypt_vote(&vote, keys.public_key().unwrap()).unwrap();
        STANDARD.encode(block)
    }

    fn modern_payload(secret: &str) -> String {
        let inner = json!({
            "serviceName": "Hyvote",
            "username": "Alice",
            "address": "1.2.3.4",
            "timestamp": 1_700_000_000_000i64,
        });
        ModernEnvelope::signed(inner.to_string(), secret)
            .unwrap()
            .to_json()
    }

    #[test]
    fn legacy_vote_scenario() {
        let p = processor(ProtocolToggles::default());
        let accepted = p.process_payload(&legacy_payload(p.keys())).unwrap();
        assert_eq!(accepted.protocol, Protocol::Legacy);
        assert_eq!(
            accepted.vote,
            Vote::new("Hyvote", "Alice", "1.2.3.4", 1_700_000_000_000).unwrap()
        );
    }

    #[test]
    fn modern_vote_scenario() {
        let p = processor(ProtocolToggles::default());
        let accepted = p.process_payload(&modern_payload(SECRET)).unwrap();
        assert_eq!(accepted.protocol, Protocol::Modern);
        assert_eq!(accepted.vote.username(), "Alice");

        // Token off by one character.
        let err = p.process_payload(&modern_payload("hyvote-secreT")).unwrap_err();
        assert!(matches!(err, VoteError::Signature(_)), "{err:?}");
    }

    #[test]
    fn empty_and_blank_payloads() {
        let p = processor(ProtocolToggles::default());
        assert!(matches!(p.process_payload(""), Err(VoteError::EmptyPayload)));
        assert!(matches!(p.process_payload(" \n\t "), Err(VoteError::EmptyPayload)));
    }

    #[test]
    fn toggles_gate_each_protocol() {
        let p = processor(ProtocolToggles {
            legacy_enabled: false,
            modern_enabled: true,
        });
        assert!(matches!(
            p.process_payload(&legacy_payload(p.keys())),
            Err(VoteError::ProtocolDisabled(Protocol::Legacy))
        ));
        assert!(matches!(
            p.process_legacy_block(&[0u8; 256]),
            Err(VoteError::ProtocolDisabled(Protocol::Legacy))
        ));
        assert!(p.process_payload(&modern_payload(SECRET)).is_ok());

        let p = processor(ProtocolToggles {
            legacy_enabled: true,
            modern_enabled: false,
        });
        assert!(matches!(
            p.process_payload(&modern_payload(SECRET)),
            Err(VoteError::ProtocolDisabled(Protocol::Modern))
        ));
        assert!(!p.modern_available());
    }

    #[test]
    fn missing_keys_is_key_error() {
        let p = VoteProcessor::new(
            Arc::new(KeyStore::new()),
            Arc::new(ServiceTokenTable::new()),
            ProtocolToggles::default(),
        );
        let err = p.process_payload("aGVsbG8=").unwrap_err();
        assert!(matches!(err, VoteError::Key(_)), "{err:?}");
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[tokio::test]
    async fn bounded_body_at_and_over_limit() {
        let exact = vec![b'a'; 16];
        let body = read_bounded_body(&exact[..], 16).await.unwrap();
        assert_eq!(body.len(), 16);

        let over = vec![b'a'; 17];
        assert!(matches!(
            read_bounded_body(&over[..], 16).await,
            Err(VoteError::PayloadTooLarge { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn oversized_http_body_is_rejected_before_parsing() {
        let p = processor(ProtocolToggles::default());
        let huge = vec![b'{'; MAX_HTTP_BODY_BYTES + 1];
        assert!(matches!(
            p.process_reader(&huge[..], MAX_HTTP_BODY_BYTES).await,
            Err(VoteError::PayloadTooLarge { .. })
        ));

        let payload = format!("\n  {}  \n", modern_payload(SECRET));
        let accepted = p
            .process_reader(payload.as_bytes(), MAX_HTTP_BODY_BYTES)
            .await
            .unwrap();
        assert_eq!(accepted.protocol, Protocol::Modern);
    }

    #[test]
    fn body_limit_chunks() {
        let mut body = BodyLimit::new(4);
        body.push(b"ab").unwrap();
        body.push(b"cd").unwrap();
        assert!(matches!(body.push(b"e"), Err(VoteError::PayloadTooLarge { limit: 4 })));

        let mut body = BodyLimit::new(4);
        body.push(b"abcd").unwrap();
        assert_eq!(body.into_bytes(), b"abcd");
    }
}
