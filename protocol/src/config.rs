//! # Protocol Configuration & Constants
//!
//! Every wire-level number the receiver depends on lives here. Most of these
//! are fixed by deployed voting-site clients, so changing one is a
//! compatibility break, not a tuning knob.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Socket Wire Format
// ---------------------------------------------------------------------------

/// Magic prefix of a modern (V2) socket frame, big-endian on the wire.
pub const V2_MAGIC: u16 = 0x733A;

/// First byte of a TLS record carrying a handshake (ClientHello).
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Major version byte shared by SSL 3.0 and every TLS 1.x record header.
pub const TLS_MAJOR_VERSION: u8 = 0x03;

/// Upper bound on a modern frame body. Frames declaring more are refused
/// before any body byte is read.
pub const MAX_MESSAGE_LENGTH: usize = 65_536;

/// Size of a legacy RSA ciphertext block. 2048-bit modulus, 256 bytes.
pub const V1_BLOCK_SIZE: usize = 256;

/// Number of random bytes in a per-connection challenge, before base64.
pub const CHALLENGE_BYTES: usize = 24;

/// Prefix of the greeting line sent on connect. The challenge follows it.
pub const GREETING_PREFIX: &str = "VOTIFIER 2";

/// Per-read timeout on socket connections. A peer that stalls longer than
/// this mid-handshake is dropped.
pub const SOCKET_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How long in-flight socket connections get to finish after shutdown
/// begins. Anything still running afterwards is aborted.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// RSA modulus size for the server key pair.
pub const RSA_KEY_BITS: usize = 2048;

/// File name of the PKCS#8 PEM private key inside the key directory.
pub const PRIVATE_KEY_FILE: &str = "rsa.key";

/// File name of the X.509 (SubjectPublicKeyInfo) PEM public key.
pub const PUBLIC_KEY_FILE: &str = "rsa.pub";

// ---------------------------------------------------------------------------
// Legacy Plaintext Format
// ---------------------------------------------------------------------------

/// Header line of a decrypted legacy vote. Compared case-insensitively.
pub const VOTE_HEADER: &str = "VOTE";

/// Minimum number of newline-separated fields in a legacy vote.
pub const V1_MIN_LINES: usize = 5;

// ---------------------------------------------------------------------------
// Modern Payload
// ---------------------------------------------------------------------------

/// Timestamps strictly below this (and above zero) are taken to be epoch
/// seconds and scaled to milliseconds. 10^12 ms is September 2001.
pub const SECONDS_THRESHOLD: i64 = 1_000_000_000_000;

// ---------------------------------------------------------------------------
// HTTP Ingestion
// ---------------------------------------------------------------------------

/// Largest accepted HTTP vote body. One byte more is `PayloadTooLarge`.
pub const MAX_HTTP_BODY_BYTES: usize = 32 * 1024;

/// Path prefix under which the HTTP endpoints are mounted. Voting sites
/// have this baked into their configuration.
pub const HTTP_BASE_PATH: &str = "/Hyvote/HytaleVotifier";

/// Server type reported by the status endpoint.
pub const SERVER_TYPE: &str = "HytaleVotifier";

// ---------------------------------------------------------------------------
// Network Defaults
// ---------------------------------------------------------------------------

/// Default raw socket port. Same as every other Votifier implementation.
pub const DEFAULT_SOCKET_PORT: u16 = 8192;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

// ---------------------------------------------------------------------------
// Vote Store
// ---------------------------------------------------------------------------

/// Default vote expiry (TTL) in hours.
pub const DEFAULT_VOTE_TTL_HOURS: u32 = 24;

/// Default interval between expiry sweeps, in hours. Independent of the TTL.
pub const DEFAULT_CLEANUP_INTERVAL_HOURS: u32 = 6;

/// Default file name of the persistent vote database in the data directory.
pub const DEFAULT_STORE_FILE: &str = "votes.db";

/// Milliseconds in one hour.
pub const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;

/// Converts a TTL expressed in hours to milliseconds.
pub fn ttl_millis(ttl_hours: u32) -> i64 {
    i64::from(ttl_hours) * MILLIS_PER_HOUR
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
