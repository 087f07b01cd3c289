//! # HMAC-SHA256
//!
//! Signature scheme of the modern protocol. The voting site and the server
//! share a token per site; the site sends `base64(HMAC-SHA256(token,
//! payload))` next to the payload string.
//!
//! Verification compares digests with `subtle` so the time taken does not
//! depend on how many leading bytes match. It returns a plain `bool`: bad
//! base64, a short signature and a wrong digest all look the same from the
//! outside.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 tag in bytes.
pub const HMAC_SHA256_LEN: usize = 32;

/// Compute HMAC-SHA256 of `message` keyed by `secret`.
///
/// HMAC accepts keys of any length, so the error path is unreachable in
/// practice; it is surfaced rather than unwrapped.
pub fn hmac_sign(message: &[u8], secret: &[u8]) -> Result<[u8; HMAC_SHA256_LEN], InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

/// [`hmac_sign`], base64-encoded the way the wire format carries it.
pub fn hmac_sign_base64(message: &[u8], secret: &[u8]) -> Result<String, InvalidLength> {
    Ok(STANDARD.encode(hmac_sign(message, secret)?))
}

/// Check a base64 signature over `message`.
pub fn hmac_verify(message: &[u8], signature_base64: &str, secret: &[u8]) -> bool {
    let Ok(expected) = hmac_sign(message, secret) else {
        return false;
    };
    let Ok(actual) = STANDARD.decode(signature_base64.trim()) else {
        return false;
    };
    constant_time_eq(&expected, &actual)
}

/// Byte comparison whose running time depends only on the lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    // `ct_eq` on slices of unequal length returns 0 without looking at the
    // contents, which only reveals the length.
    a.ct_eq(b).into()
}
