//! Modern (V2) vote format.
//!
//! ```text
//! {
//!   "payload":   "{\"serviceName\":\"Hyvote\",\"username\":\"Alice\",...}",
//!   "signature": "<base64 HMAC-SHA256(token, payload)>"
//! }
//! ```
//!
//! The payload is a JSON document carried as a string so the signature can
//! cover its exact bytes. Checks run in a fixed order: outer structure,
//! inner structure, challenge (socket only), token lookup, signature. A
//! vote is only produced when all of them pass.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{now_millis, SECONDS_THRESHOLD};
use crate::crypto::challenge::Challenge;
use crate::crypto::mac::{hmac_sign_base64, hmac_verify};
use crate::error::VoteError;
use crate::vote::Vote;
use crate::wire::{Protocol, ServiceTokenTable};

/// The outer signed envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModernEnvelope {
    /// Inner JSON document, as an opaque string.
    pub payload: String,
    /// Base64 HMAC-SHA256 of `payload`.
    pub signature: String,
}

impl ModernEnvelope {
    /// Sign `payload` with `secret`. This is the sender's side of the
    /// exchange, used by test tooling.
    pub fn signed(payload: impl Into<String>, secret: &str) -> Result<Self, VoteError> {
        let payload = payload.into();
        let signature = hmac_sign_base64(payload.as_bytes(), secret.as_bytes())
            .map_err(|e| VoteError::Internal(e.to_string()))?;
        Ok(Self { payload, signature })
    }

    /// Serialize to the wire JSON.
    pub fn to_json(&self) -> String {
        // A struct of two strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    payload: Option<String>,
    signature: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InnerPayload {
    service_name: Option<String>,
    username: Option<String>,
    address: Option<String>,
    #[serde(default)]
    timestamp: Value,
    challenge: Option<String>,
}

/// Parse and authenticate a modern envelope.
///
/// `expected_challenge` is `Some` on the socket, where the payload must
/// echo the challenge from the greeting, and `None` over HTTP.
pub fn parse(
    json: &str,
    tokens: &ServiceTokenTable,
    expected_challenge: Option<&Challenge>,
) -> Result<Vote, VoteError> {
    let envelope: RawEnvelope = serde_json::from_str(json)
        .map_err(|e| VoteError::parse(Protocol::Modern, format!("invalid JSON: {e}")))?;

    let payload = non_blank(envelope.payload)
        .ok_or_else(|| VoteError::parse(Protocol::Modern, "missing required 'payload' field"))?;
    let signature = non_blank(envelope.signature)
        .ok_or_else(|| VoteError::parse(Protocol::Modern, "missing required 'signature' field"))?;

    let inner: InnerPayload = serde_json::from_str(&payload).map_err(|e| {
        VoteError::parse(Protocol::Modern, format!("invalid inner payload JSON: {e}"))
    })?;

    let service_name = non_blank(inner.service_name)
        .ok_or_else(|| VoteError::parse(Protocol::Modern, "payload missing serviceName"))?;
    let username = non_blank(inner.username)
        .ok_or_else(|| VoteError::parse(Protocol::Modern, "payload missing username"))?;
    let raw_timestamp = lenient_timestamp(&inner.timestamp)?;

    if let Some(expected) = expected_challenge {
        let echoed = non_blank(inner.challenge)
            .ok_or_else(|| VoteError::Challenge("V2 payload missing challenge".to_string()))?;
        if !expected.matches(&echoed) {
            return Err(VoteError::Challenge("Challenge mismatch".to_string()));
        }
    }

    let secret = tokens.lookup(&service_name).ok_or_else(|| {
        VoteError::Signature(format!("no token configured for service: {service_name}"))
    })?;

    if !hmac_verify(payload.as_bytes(), &signature, secret.as_bytes()) {
        return Err(VoteError::Signature(format!(
            "invalid signature for service: {service_name}"
        )));
    }

    let timestamp = normalize_timestamp(raw_timestamp, now_millis());
    Vote::new(service_name, username, inner.address.unwrap_or_default(), timestamp)
        .map_err(|e| VoteError::parse(Protocol::Modern, e.to_string()))
}

/// Bring a sender timestamp to epoch milliseconds.
///
/// Positive values below 10^12 are taken as seconds. Zero or negative means
/// the sender did not supply one and `now` is used.
pub fn normalize_timestamp(timestamp: i64, now: i64) -> i64 {
    if timestamp <= 0 {
        now
    } else if timestamp < SECONDS_THRESHOLD {
        timestamp.saturating_mul(1000)
    } else {
        timestamp
    }
}

/// Accept the shapes sites actually send: integers, floats and numeric
/// strings. Missing or null reads as zero.
fn lenient_timestamp(value: &Value) -> Result<i64, VoteError> {
    let invalid = || VoteError::parse(Protocol::Modern, "invalid timestamp");
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(invalid),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .or_else(|_| s.parse::<f64>().map(|f| f as i64))
                .map_err(|_| invalid())
        }
        _ => Err(invalid()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
