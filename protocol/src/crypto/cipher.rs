//! # RSA PKCS#1 v1.5
//!
//! Decryption of legacy vote blocks. The padding scheme is fixed by the V1
//! wire format; OAEP would be the better choice for anything new, but the
//! senders we talk to do not speak it.
//!
//! Every decryption failure collapses into one opaque error. Whether the
//! padding was wrong, the block had the wrong length, or the key didn't
//! match is nobody's business but ours: a sender that can tell those apart
//! has a padding oracle.

use rand::rngs::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

/// Opaque RSA failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("decryption failed")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,
}

/// Decrypt a PKCS#1 v1.5 block with the server's private key.
///
/// Uses blinded decryption so timing does not depend on the ciphertext.
pub fn rsa_decrypt(ciphertext: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>, CipherError> {
    key.decrypt_blinded(&mut OsRng, Pkcs1v15Encrypt, ciphertext)
        .map_err(|_| CipherError::Decrypt)
}

/// Encrypt a message to a public key with PKCS#1 v1.5 padding.
///
/// This is the sender side of the legacy protocol. The receiver never needs
/// it; it exists for test tooling and for operators checking a key pair.
pub fn rsa_encrypt(plaintext: &[u8], key: &RsaPublicKey) -> Result<Vec<u8>, CipherError> {
    key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|_| CipherError::Encrypt)
}
