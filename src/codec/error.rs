//! # Codec Error Types

use thiserror::Error;

/// Failures of key generation, encryption and decryption
///
/// `Decrypt` carries no detail: callers cannot tell a
/// wrong key from a corrupt ciphertext or a padding failure.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Key pair generation failed (entropy or allocation)
    #[error("key pair generation failed: {0}")]
    KeyGen(String),
    /// Encryption failed: unparseable public key or RSA failure
    #[error("encryption failed: {0}")]
    Encrypt(String),
    /// Plaintext does not fit the OAEP payload of the key
    #[error("encryption failed: plaintext is {len} bytes but this key accepts at most {max}")]
    PayloadTooLarge { len: usize, max: usize },
    /// Decryption failed
    #[error("decryption failed")]
    Decrypt,
    /// A PEM key could not be decoded or encoded
    #[error("invalid {kind} key: {reason}")]
    InvalidKey { kind: KeyKind, reason: String },
}

/// Which half of a key pair an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Public,
    Private,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Public => f.write_str("public"),
            KeyKind::Private => f.write_str("private"),
        }
    }
}
