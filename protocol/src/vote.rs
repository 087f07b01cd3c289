//! # Vote Record
//!
//! The canonical output of both wire protocols. A [`Vote`] only exists once
//! a payload has passed its format-specific checks, and construction itself
//! refuses blank service names and usernames, so downstream consumers never
//! have to re-validate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a [`Vote`] cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidVote {
    #[error("serviceName cannot be blank")]
    BlankServiceName,

    #[error("username cannot be blank")]
    BlankUsername,
}

/// An authenticated vote notification from a voting site.
///
/// Immutable once built. Fields are private so the non-blank invariant
/// cannot be bypassed by struct literal syntax.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawVote")]
pub struct Vote {
    service_name: String,
    username: String,
    address: String,
    timestamp: i64,
}

impl Vote {
    /// Build a vote. `service_name` and `username` must contain at least one
    /// non-whitespace character; `address` may be empty.
    ///
    /// Values are stored as given. Trimming is the parser's job since the
    /// two wire formats disagree on it.
    pub fn new(
        service_name: impl Into<String>,
        username: impl Into<String>,
        address: impl Into<String>,
        timestamp: i64,
    ) -> Result<Self, InvalidVote> {
        let service_name = service_name.into();
        let username = username.into();

        if service_name.trim().is_empty() {
            return Err(InvalidVote::BlankServiceName);
        }
        if username.trim().is_empty() {
            return Err(InvalidVote::BlankUsername);
        }

        Ok(Self {
            service_name,
            username,
            address: address.into(),
            timestamp,
        })
    }

    /// Identifier of the voting site (e.g. "Hyvote").
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The player who voted.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Voter IP as reported by the site. Possibly empty.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Epoch milliseconds when the vote was cast.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Vote(service={}, username={}, address={}, timestamp={})",
            self.service_name, self.username, self.address, self.timestamp
        )
    }
}

/// Deserialization shadow of [`Vote`] so serde goes through [`Vote::new`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVote {
    service_name: String,
    username: String,
    #[serde(default)]
    address: String,
    timestamp: i64,
}

impl TryFrom<RawVote> for Vote {
    type Error = InvalidVote;

    fn try_from(raw: RawVote) -> Result<Self, Self::Error> {
        Vote::new(raw.service_name, raw.username, raw.address, raw.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_valid_vote() {
        let vote = Vote::new("Hyvote", "Alice", "1.2.3.4", 1_700_000_000_000).unwrap();
        assert_eq!(vote.service_name(), "Hyvote");
        assert_eq!(vote.username(), "Alice");
        assert_eq!(vote.address(), "1.2.3.4");
        assert_eq!(vote.timestamp(), 1_700_000_000_000);
    }

    #[test]
    fn empty_address_is_allowed() {
        let vote = Vote::new("Hyvote", "Alice", "", 0).unwrap();
        assert_eq!(vote.address(), "");
    }

    #[test]
    fn blank_service_name_rejected() {
        assert_eq!(
            Vote::new("   ", "Alice", "", 0).unwrap_err(),
            InvalidVote::BlankServiceName
        );
        assert_eq!(
            Vote::new("", "Alice", "", 0).unwrap_err(),
            InvalidVote::BlankServiceName
        );
    }

    #[test]
    fn blank_username_rejected() {
        assert_eq!(
            Vote::new("Hyvote", "\t\n", "", 0).unwrap_err(),
            InvalidVote::BlankUsername
        );
    }

    #[test]
    fn serializes_camel_case() {
        let vote = Vote::new("Hyvote", "Alice", "1.2.3.4", 42).unwrap();
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["serviceName"], "Hyvote");
        assert_eq!(json["username"], "Alice");
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn deserialization_enforces_invariants() {
        let bad = r#"{"serviceName":"","username":"Alice","timestamp":1}"#;
        assert!(serde_json::from_str::<Vote>(bad).is_err());

        let good = r#"{"serviceName":"Hyvote","username":"Alice","timestamp":1}"#;
        let vote: Vote = serde_json::from_str(good).unwrap();
        assert_eq!(vote.address(), "");
    }
}
