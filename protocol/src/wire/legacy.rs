//! Legacy (V1) vote format.
//!
//! The sender RSA-encrypts a short newline-delimited record with the
//! server's public key:
//!
//! ```text
//! VOTE
//! <serviceName>
//! <username>
//! <address>
//! <timestamp>
//! ```
//!
//! Over the socket the 256-byte ciphertext arrives raw. Over HTTP it is
//! base64-encoded. Fields are trimmed, the header is case-insensitive and an
//! unparseable timestamp falls back to the time of receipt. Lines past the
//! fifth are ignored.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::config::{now_millis, VOTE_HEADER, V1_MIN_LINES};
use crate::crypto::cipher::{rsa_decrypt, rsa_encrypt, CipherError};
use crate::error::VoteError;
use crate::vote::Vote;
use crate::wire::Protocol;

/// Decrypt a raw RSA block and parse the plaintext.
pub fn decrypt_block(block: &[u8], key: &RsaPrivateKey) -> Result<Vote, VoteError> {
    let plaintext = rsa_decrypt(block, key).map_err(|_| VoteError::Decryption)?;
    parse_plaintext(&plaintext)
}

/// Base64-decode, decrypt and parse an HTTP legacy payload.
///
/// Senders may wrap the base64 at any column with CRLF or LF, so all ASCII
/// whitespace is dropped before decoding. Undecodable base64 is a framing
/// problem, distinct from both a bad ciphertext and a bad plaintext.
pub fn decode_and_decrypt(payload: &str, key: &RsaPrivateKey) -> Result<Vote, VoteError> {
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let block = STANDARD
        .decode(compact)
        .map_err(|_| VoteError::InvalidFraming("Invalid Base64 encoding".to_string()))?;
    decrypt_block(&block, key)
}

/// Parse decrypted V1 plaintext into a [`Vote`].
pub fn parse_plaintext(plaintext: &[u8]) -> Result<Vote, VoteError> {
    if plaintext.is_empty() {
        return Err(VoteError::parse(Protocol::Legacy, "vote data is empty"));
    }

    let text = String::from_utf8_lossy(plaintext);
    let lines = split_lines(&text);

    if lines.len() < V1_MIN_LINES {
        return Err(VoteError::parse(
            Protocol::Legacy,
            format!("expected at least {V1_MIN_LINES} lines, got {}", lines.len()),
        ));
    }

    if !lines[0].trim().eq_ignore_ascii_case(VOTE_HEADER) {
        return Err(VoteError::parse(Protocol::Legacy, "invalid header"));
    }

    let timestamp = lines[4]
        .trim()
        .parse::<i64>()
        .unwrap_or_else(|_| now_millis());

    Vote::new(lines[1].trim(), lines[2].trim(), lines[3].trim(), timestamp)
        .map_err(|e| VoteError::parse(Protocol::Legacy, e.to_string()))
}

/// Render a vote as V1 plaintext. Used by senders and test tooling.
pub fn encode_plaintext(vote: &Vote) -> String {
    format!(
        "{VOTE_HEADER}\n{}\n{}\n{}\n{}\n",
        vote.service_name(),
        vote.username(),
        vote.address(),
        vote.timestamp()
    )
}

/// Encrypt a vote into a raw V1 block for `key`.
pub fn encrypt_vote(vote: &Vote, key: &RsaPublicKey) -> Result<Vec<u8>, CipherError> {
    rsa_encrypt(encode_plaintext(vote).as_bytes(), key)
}

/// Split on `\n`, dropping trailing empty segments so a terminating newline
/// (or several) does not count as extra lines.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_key_store;

    fn parse_str(s: &str) -> Result<Vote, VoteError> {
        parse_plaintext(s.as_bytes())
    }

    fn parse_error_message(result: Result<Vote, VoteError>) -> String {
        match result {
            Err(VoteError::Parse {
                protocol: Protocol::Legacy,
                message,
            }) => message,
            other => panic!("expected legacy parse error, got {other:?}"),
        }
    }

    #[test]
    fn parses_well_formed_plaintext() {
        let vote = parse_str("VOTE\nHyvote\nAlice\n1.2.3.4\n1700000000000\n").unwrap();
        assert_eq!(vote.service_name(), "Hyvote");
        assert_eq!(vote.username(), "Alice");
        assert_eq!(vote.address(), "1.2.3.4");
        assert_eq!(vote.timestamp(), 1_700_000_000_000);
    }

    #[test]
    fn header_is_case_insensitive_and_fields_trimmed() {
        let vote = parse_str("  vote \r\n Hyvote \r\n Alice\r\n 1.2.3.4 \r\n 42 ").unwrap();
        assert_eq!(vote.service_name(), "Hyvote");
        assert_eq!(vote.username(), "Alice");
        assert_eq!(vote.address(), "1.2.3.4");
        assert_eq!(vote.timestamp(), 42);
    }

    #[test]
    fn bad_timestamp_falls_back_to_now() {
        let before = now_millis();
        let vote = parse_str("VOTE\nHyvote\nAlice\n1.2.3.4\nyesterday").unwrap();
        let after = now_millis();
        assert!(vote.timestamp() >= before && vote.timestamp() <= after);
    }

    #[test]
    fn extra_lines_are_ignored() {
        let vote = parse_str("VOTE\nHyvote\nAlice\n\n5\ntrailing\njunk").unwrap();
        assert_eq!(vote.address(), "");
        assert_eq!(vote.timestamp(), 5);
    }

    #[test]
    fn too_few_lines() {
        let msg = parse_error_message(parse_str("VOTE\nHyvote\nAlice\n1.2.3.4"));
        assert!(msg.starts_with("expected at least 5 lines"), "{msg}");

        // Trailing newlines do not make up the count.
        let msg = parse_error_message(parse_str("VOTE\nHyvote\nAlice\n1.2.3.4\n\n\n"));
        assert!(msg.starts_with("expected at least 5 lines"), "{msg}");
    }

    #[test]
    fn wrong_header() {
        let msg = parse_error_message(parse_str("VOTES\nHyvote\nAlice\n1.2.3.4\n1"));
        assert_eq!(msg, "invalid header");
    }

    #[test]
    fn blank_fields_rejected() {
        let msg = parse_error_message(parse_str("VOTE\n   \nAlice\n1.2.3.4\n1"));
        assert!(msg.contains("serviceName"), "{msg}");
        let msg = parse_error_message(parse_str("VOTE\nHyvote\n\t\n1.2.3.4\n1"));
        assert!(msg.contains("username"), "{msg}");
    }

    #[test]
    fn empty_plaintext() {
        assert!(matches!(parse_plaintext(b""), Err(VoteError::Parse { .. })));
    }

    #[test]
    fn encrypted_roundtrip_through_block_and_base64() {
        let keys = test_key_store();
        let vote = Vote::new("Hyvote", "Alice", "1.2.3.4", 1_700_000_000_000).unwrap();
        let block = encrypt_vote(&vote, keys.public_key().unwrap()).unwrap();
        assert_eq!(block.len(), 256);

        let decoded = decrypt_block(&block, keys.private_key().unwrap()).unwrap();
        assert_eq!(decoded, vote);

        let b64 = STANDARD.encode(&block);
        let decoded = decode_and_decrypt(&format!("  {b64}\n"), keys.private_key().unwrap()).unwrap();
        assert_eq!(decoded, vote);
    }

    #[test]
    fn line_wrapped_base64_is_accepted() {
        let keys = test_key_store();
        let vote = Vote::new("Hyvote", "alice", "1.2.3.4", 1_700_000_000_000).unwrap();
        let block = encrypt_vote(&vote, keys.public_key().unwrap()).unwrap();
        let b64 = STANDARD.encode(&block);

        let wrapped = b64
            .as_bytes()
            .chunks(76)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert!(wrapped.contains("\r\n"));

        let decoded = decode_and_decrypt(&wrapped, keys.private_key().unwrap()).unwrap();
        assert_eq!(decoded, vote);
    }

    #[test]
    fn bad_base64_is_framing_error() {
        let keys = test_key_store();
        let err = decode_and_decrypt("not*base64!", keys.private_key().unwrap()).unwrap_err();
        assert!(matches!(err, VoteError::InvalidFraming(_)), "{err:?}");
        assert_eq!(err.public_message(), "Invalid Base64 encoding");
    }

    #[test]
    fn random_block_is_decryption_error() {
        let keys = test_key_store();
        let err = decrypt_block(&[0x42u8; 256], keys.private_key().unwrap()).unwrap_err();
        assert!(matches!(err, VoteError::Decryption), "{err:?}");
    }

    #[test]
    fn encrypted_garbage_plaintext_is_parse_error() {
        let keys = test_key_store();
        let block = rsa_encrypt(b"hello world", keys.public_key().unwrap()).unwrap();
        let err = decrypt_block(&block, keys.private_key().unwrap()).unwrap_err();
        assert!(matches!(err, VoteError::Parse { .. }), "{err:?}");
    }
}
