//! # Codec
//!
//! Asymmetric encryption of configuration values.
//!
//! - RSA key pairs, serialized as PKCS#1 PEM with LF line endings
//! - RSA-OAEP with SHA-512 (digest and MGF1), empty label
//! - Ciphertexts travel inside configuration documents as standard base64
//!
//! Decryption failures are opaque: a wrong key, a corrupt
//! ciphertext, a padding failure and a non UTF-8 plaintext all surface as the
//! same [`CodecError::Decrypt`].

mod error;

pub use error::{CodecError, KeyKind};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha512;
use zeroize::Zeroizing;

/// SHA-512 output size in bytes
const OAEP_DIGEST_LEN: usize = 64;

/// Smallest modulus we are willing to generate; anything below cannot carry
/// a useful OAEP SHA-512 payload.
pub const MIN_KEY_BITS: usize = 2048;

/// A freshly generated or loaded key pair, both halves PEM encoded
#[derive(Clone)]
pub struct KeyPair {
    /// PKCS#1 `RSA PUBLIC KEY` PEM
    pub public_key: String,
    /// PKCS#1 `RSA PRIVATE KEY` PEM
    pub private_key: Zeroizing<String>,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Generate a new RSA key pair of `bits` modulus size
///
/// This is CPU bound (hundreds of milliseconds for 2048 bits); async callers
/// should run it on a blocking thread.
///
/// # Errors
///
/// Returns [`CodecError::KeyGen`] if `bits` is below [`MIN_KEY_BITS`] or the
/// RNG / prime search fails.
pub fn generate_key_pair(bits: usize) -> Result<KeyPair, CodecError> {
    if bits < MIN_KEY_BITS {
        return Err(CodecError::KeyGen(format!(
            "modulus of {bits} bits is below the minimum of {MIN_KEY_BITS}"
        )));
    }

    let mut rng = rand::rngs::OsRng;
    let private = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| CodecError::KeyGen(e.to_string()))?;
    let public = RsaPublicKey::from(&private);

    let private_key = private
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CodecError::KeyGen(format!("failed to encode private key: {e}")))?;
    let public_key = public
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CodecError::KeyGen(format!("failed to encode public key: {e}")))?;

    Ok(KeyPair {
        public_key,
        private_key,
    })
}

/// Parse a PKCS#1 PEM public key
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if the PEM block cannot be decoded.
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CodecError> {
    RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| CodecError::InvalidKey {
        kind: KeyKind::Public,
        reason: e.to_string(),
    })
}

/// Parse a PKCS#1 PEM private key
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if the PEM block cannot be decoded.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CodecError> {
    RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| CodecError::InvalidKey {
        kind: KeyKind::Private,
        reason: e.to_string(),
    })
}

/// Re-encode a public key in canonical form
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if the key cannot be decoded or encoded.
pub fn encode_public_key(key: &RsaPublicKey) -> Result<String, CodecError> {
    key.to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CodecError::InvalidKey {
            kind: KeyKind::Public,
            reason: e.to_string(),
        })
}

/// Re-encode a private key in canonical form
///
/// # Errors
///
/// Returns [`CodecError::InvalidKey`] if the key cannot be encoded.
pub fn encode_private_key(key: &RsaPrivateKey) -> Result<Zeroizing<String>, CodecError> {
    key.to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| CodecError::InvalidKey {
            kind: KeyKind::Private,
            reason: e.to_string(),
        })
}

/// Largest plaintext (in bytes) that `key` can encrypt with OAEP SHA-512
pub fn max_payload(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(2 * OAEP_DIGEST_LEN + 2)
}

fn padding() -> Oaep {
    Oaep::new::<Sha512>()
}

/// Encrypt raw bytes with a parsed public key
///
/// # Errors
///
/// Returns [`CodecError::PayloadTooLarge`] if `plaintext` exceeds
/// [`max_payload`], or [`CodecError::Encrypt`] on RSA failure.
pub fn encrypt_bytes(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
    let max = max_payload(key);
    if plaintext.len() > max {
        return Err(CodecError::PayloadTooLarge {
            len: plaintext.len(),
            max,
        });
    }

    let mut rng = rand::rngs::OsRng;
    key.encrypt(&mut rng, padding(), plaintext)
        .map_err(|e| CodecError::Encrypt(e.to_string()))
}

/// Decrypt raw bytes with a parsed private key
///
/// # Errors
///
/// Returns [`CodecError::Decrypt`] on any failure.
pub fn decrypt_bytes(
    key: &RsaPrivateKey,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CodecError> {
    key.decrypt(padding(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| CodecError::Decrypt)
}

/// Encrypt a configuration value for `public_key_pem`
///
/// Returns the base64 encoded ciphertext as stored in configuration documents.
///
/// # Errors
///
/// Returns [`CodecError::Encrypt`] if the key cannot be parsed, and
/// [`CodecError::PayloadTooLarge`] if the value does not fit the key.
pub fn encrypt(public_key_pem: &str, plaintext: &str) -> Result<String, CodecError> {
    let key = parse_public_key(public_key_pem)
        .map_err(|e| CodecError::Encrypt(e.to_string()))?;
    let ciphertext = encrypt_bytes(&key, plaintext.as_bytes())?;
    Ok(STANDARD.encode(ciphertext))
}

/// Decrypt a base64 encoded configuration value with `private_key`
///
/// # Errors
///
/// Returns [`CodecError::Decrypt`] for malformed base64, a wrong key, a
/// padding failure or a non UTF-8 plaintext.
pub fn decrypt(
    private_key: &RsaPrivateKey,
    ciphertext_b64: &str,
) -> Result<Zeroizing<String>, CodecError> {
    let ciphertext = STANDARD
        .decode(ciphertext_b64.trim())
        .map_err(|_| CodecError::Decrypt)?;
    let plaintext = decrypt_bytes(private_key, &ciphertext)?;
    let text = std::str::from_utf8(&plaintext).map_err(|_| CodecError::Decrypt)?;
    Ok(Zeroizing::new(text.to_owned()))
}
