//! # Key Store
//!
//! Per-namespace RSA key pairs.
//!
//! - [`KeyManager`] owns the lifecycle: the pair lives in a `Secret` named
//!   `heimdall` in its namespace and is created on the first public key
//!   request (acquire-or-create, safe against concurrent first use).
//! - [`KeysGrpcService`] exposes the manager over gRPC (`heimdall.keys.v1`).
//! - [`GrpcKeyStore`] is the client side used by the injector and the CLI.
//!
//! All three speak [`KeyStore`], so the injector does not care whether the
//! keys are local or remote.

mod client;
mod manager;
pub mod proto;
mod record;
mod server;

pub use client::GrpcKeyStore;
pub use manager::KeyManager;
pub use record::{decode_key_pair_secret, key_pair_secret};
pub use server::{serve, KeysGrpcService};

use crate::cluster::ClusterError;
use crate::codec::CodecError;
use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

/// Namespace scoped access to key material
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Public half of the namespace key pair, creating the pair on first use
    async fn public_key(&self, namespace: &str) -> Result<String, KeyStoreError>;

    /// Private half of an existing key pair; never creates one
    async fn private_key(&self, namespace: &str) -> Result<Zeroizing<String>, KeyStoreError>;
}

/// Key store failures
///
/// `KeyNotFound` is distinct from transport failures: a
/// namespace that never requested a public key will not gain a private key
/// by retrying.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("no key pair exists for namespace '{0}'")]
    KeyNotFound(String),
    #[error("invalid namespace '{0}'")]
    InvalidNamespace(String),
    #[error("key store unavailable: {0}")]
    Unavailable(String),
    #[error("key pair record in namespace '{namespace}' is corrupt: {reason}")]
    CorruptRecord { namespace: String, reason: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("key store internal error: {0}")]
    Internal(String),
}

impl KeyStoreError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, KeyStoreError::Unavailable(_))
    }

    /// Reason label for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStoreError::KeyNotFound(_) => "key_not_found",
            KeyStoreError::InvalidNamespace(_) => "invalid_namespace",
            KeyStoreError::Unavailable(_) => "unavailable",
            KeyStoreError::CorruptRecord { .. } => "corrupt_record",
            KeyStoreError::Codec(_) => "codec",
            KeyStoreError::Internal(_) => "internal",
        }
    }
}

impl From<ClusterError> for KeyStoreError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Client(_) => KeyStoreError::Unavailable(err.to_string()),
            ClusterError::Api { code, .. } if code == 429 || code >= 500 => {
                KeyStoreError::Unavailable(err.to_string())
            }
            other => KeyStoreError::Internal(other.to_string()),
        }
    }
}

impl From<KeyStoreError> for tonic::Status {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::KeyNotFound(_) => tonic::Status::not_found(err.to_string()),
            KeyStoreError::InvalidNamespace(_) => tonic::Status::invalid_argument(err.to_string()),
            KeyStoreError::Unavailable(_) => tonic::Status::unavailable(err.to_string()),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

/// Reject anything that is not a DNS-1123 label before touching storage
pub(crate) fn validate_namespace(namespace: &str) -> Result<(), KeyStoreError> {
    if crate::validation::is_dns1123_label(namespace) {
        Ok(())
    } else {
        Err(KeyStoreError::InvalidNamespace(namespace.to_owned()))
    }
}
