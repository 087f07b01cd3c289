//! # Cryptographic Primitives
//!
//! Everything that touches key material or authenticates a submission:
//!
//! - **RSA-2048 / PKCS#1 v1.5** for the legacy protocol. Not OAEP: every
//!   deployed V1 sender pads with v1.5 and we have to decrypt what they send.
//! - **HMAC-SHA256** for the modern protocol, keyed by a per-site token.
//! - **Per-connection challenges** binding a modern vote to one socket.
//!
//! Nothing here is hand-rolled. These are thin wrappers over RustCrypto
//! (`rsa`, `hmac`, `sha2`, `subtle`) that pin down the exact parameters the
//! wire formats need and collapse every failure into an undifferentiated
//! error so a sender can't learn which step failed.

pub mod challenge;
pub mod cipher;
pub mod keys;
pub mod mac;

pub use challenge::Challenge;
pub use cipher::{rsa_decrypt, rsa_encrypt, CipherError};
pub use keys::{KeyError, KeyPair, KeyStore};
pub use mac::{constant_time_eq, hmac_sign, hmac_sign_base64, hmac_verify};
