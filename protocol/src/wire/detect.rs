//! Protocol detection.
//!
//! A structural sniff, not a parse. Legacy payloads are base64 and can never
//! start with `{`, so looking for an object that mentions both envelope keys
//! is enough to route the payload; the modern parser does the real
//! validation afterwards.

use serde::{Deserialize, Serialize};

/// Which wire format a payload uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// V1: RSA-encrypted newline-delimited plaintext.
    #[serde(rename = "v1")]
    Legacy,
    /// V2: HMAC-signed JSON envelope.
    #[serde(rename = "v2")]
    Modern,
    /// Empty or blank payload.
    Unknown,
}

impl Protocol {
    /// Stable lowercase label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            Protocol::Legacy => "v1",
            Protocol::Modern => "v2",
            Protocol::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Legacy => f.write_str("V1"),
            Protocol::Modern => f.write_str("V2"),
            Protocol::Unknown => f.write_str("unknown"),
        }
    }
}

/// Classify a textual payload.
///
/// Blank is [`Protocol::Unknown`]. A trimmed payload starting with `{` that
/// contains both `"payload"` and `"signature"` is [`Protocol::Modern`].
/// Everything else is assumed to be base64 RSA ciphertext.
pub fn detect(payload: &str) -> Protocol {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Protocol::Unknown;
    }

    if trimmed.starts_with('{')
        && trimmed.contains("\"payload\"")
        && trimmed.contains("\"signature\"")
    {
        return Protocol::Modern;
    }

    Protocol::Legacy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_is_unknown() {
        assert_eq!(detect(""), Protocol::Unknown);
        assert_eq!(detect("   \r\n\t"), Protocol::Unknown);
    }

    #[test]
    fn envelope_is_modern() {
        assert_eq!(
            detect(r#"{"payload":"{}","signature":"abc="}"#),
            Protocol::Modern
        );
        assert_eq!(
            detect("  \n{ \"signature\": \"x\", \"payload\": \"y\" }\n"),
            Protocol::Modern
        );
    }

    #[test]
    fn json_missing_a_key_is_legacy() {
        assert_eq!(detect(r#"{"payload":"{}"}"#), Protocol::Legacy);
        assert_eq!(detect(r#"{"signature":"abc"}"#), Protocol::Legacy);
        assert_eq!(detect("{}"), Protocol::Legacy);
    }

    #[test]
    fn keys_without_leading_brace_is_legacy() {
        assert_eq!(
            detect(r#"["payload","signature"]"#),
            Protocol::Legacy
        );
        assert_eq!(
            detect(r#"x{"payload":"","signature":""}"#),
            Protocol::Legacy
        );
    }

    #[test]
    fn base64_is_legacy() {
        assert_eq!(detect("aGVsbG8gd29ybGQ="), Protocol::Legacy);
        assert_eq!(detect("not even base64 ###"), Protocol::Legacy);
    }

    #[test]
    fn unquoted_key_names_do_not_count() {
        // Mentions of the words outside of JSON keys are not enough.
        assert_eq!(detect("{payload signature}"), Protocol::Legacy);
    }

    #[test]
    fn any_nonblank_non_envelope_is_legacy() {
        // Sweep a spread of printable inputs. None carry both quoted keys.
        for seed in 0u32..500 {
            let s: String = (0..(seed % 40 + 1))
                .map(|i| char::from(b'!' + ((seed.wrapping_mul(31) + i * 7) % 90) as u8))
                .collect();
            if s.contains("\"payload\"") && s.contains("\"signature\"") {
                continue;
            }
            assert_eq!(detect(&s), Protocol::Legacy, "input {s:?}");
        }
    }

    #[test]
    fn display_and_label() {
        assert_eq!(Protocol::Legacy.to_string(), "V1");
        assert_eq!(Protocol::Modern.to_string(), "V2");
        assert_eq!(Protocol::Modern.label(), "v2");
        assert_eq!(serde_json::to_string(&Protocol::Legacy).unwrap(), "\"v1\"");
    }
}
