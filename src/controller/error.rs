//! # Injection Error Types
//!
//! Pipeline errors and their classification into the four classes the retry
//! policy branches on.

use crate::cluster::ClusterError;
use crate::keys::KeyStoreError;
use crate::materializer::MaterializeError;
use crate::source::SourceError;
use thiserror::Error;

/// Classification of pipeline failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Cluster API, key service or repository unavailable (retried)
    TransientInfra,
    /// Malformed document, missing path, invalid names (not retried)
    DataFormat,
    /// Missing key pair or undecryptable value (not retried)
    CryptoFailure,
    /// Concurrent modification of the deployment or config map (retried)
    StateConflict,
}

impl ErrorClass {
    /// Determine if a fresh attempt can succeed without an external change
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::TransientInfra | ErrorClass::StateConflict)
    }

    /// Get human-readable class string for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::TransientInfra => "transient_infra",
            ErrorClass::DataFormat => "data_format",
            ErrorClass::CryptoFailure => "crypto_failure",
            ErrorClass::StateConflict => "state_conflict",
        }
    }

    /// Get remediation guidance for this error class
    pub fn remediation(&self) -> String {
        match self {
            ErrorClass::TransientInfra => {
                "The cluster API, the key service or the configuration repository was unreachable. Check connectivity and the heimdall-keys service; the deployment is retried automatically and otherwise re-evaluated on its next change.".to_string()
            }
            ErrorClass::DataFormat => {
                "The configuration document is missing or invalid. Fix the document (or the heimdall-repository / heimdall-path annotations), then add and remove the heimdall-injected annotation to trigger a new attempt, or wait for the next relist or injector restart.".to_string()
            }
            ErrorClass::CryptoFailure => {
                "A value could not be decrypted. Verify it was encrypted with the public key of the configuration's namespace (heimdall public-key --namespace <ns>) and that the namespace key pair exists.".to_string()
            }
            ErrorClass::StateConflict => {
                "The deployment or config map was modified concurrently. This is usually resolved by the automatic retry.".to_string()
            }
        }
    }
}

/// Failure of one injection or cleanup pass
#[derive(Debug, Error)]
pub enum InjectionError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error("configuration targets namespace '{configuration}' but the deployment lives in '{workload}'")]
    NamespaceMismatch {
        workload: String,
        configuration: String,
    },
    #[error("failed to update deployment: {0}")]
    Cluster(#[from] ClusterError),
    #[error("deployment is missing {0}")]
    InvalidWorkload(&'static str),
}

fn classify_cluster(err: &ClusterError) -> ErrorClass {
    match err {
        ClusterError::Conflict(_) | ClusterError::AlreadyExists(_) | ClusterError::NotFound(_) => {
            ErrorClass::StateConflict
        }
        ClusterError::Api { code: 400 | 422, .. } => ErrorClass::DataFormat,
        ClusterError::Api { .. } | ClusterError::Client(_) => ErrorClass::TransientInfra,
    }
}

fn classify_key_store(err: &KeyStoreError) -> ErrorClass {
    match err {
        KeyStoreError::KeyNotFound(_)
        | KeyStoreError::CorruptRecord { .. }
        | KeyStoreError::Codec(_) => ErrorClass::CryptoFailure,
        KeyStoreError::InvalidNamespace(_) => ErrorClass::DataFormat,
        KeyStoreError::Unavailable(_) | KeyStoreError::Internal(_) => ErrorClass::TransientInfra,
    }
}

impl InjectionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            InjectionError::Source(SourceError::Unreachable(_) | SourceError::Credential(_)) => {
                ErrorClass::TransientInfra
            }
            InjectionError::Source(SourceError::PathNotFound { .. } | SourceError::Malformed(_))
            | InjectionError::NamespaceMismatch { .. }
            | InjectionError::InvalidWorkload(_) => ErrorClass::DataFormat,
            InjectionError::Materialize(MaterializeError::KeyStore(e)) => classify_key_store(e),
            InjectionError::Materialize(
                MaterializeError::PrivateKey { .. } | MaterializeError::Decrypt { .. },
            ) => ErrorClass::CryptoFailure,
            InjectionError::Materialize(MaterializeError::Cluster(e))
            | InjectionError::Cluster(e) => classify_cluster(e),
        }
    }
}
