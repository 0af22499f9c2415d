//! # Key Manager
//!
//! Acquire-or-create lifecycle of the per-namespace key pair.
//!
//! ```text
//! GetPublicKey(ns)
//!   read secret ns/heimdall ── found ──────────────────────────► public half
//!        │ absent
//!        ▼
//!   generate pair (blocking pool)
//!        ▼
//!   create secret ── created ─────────────────────────────────► our public half
//!        │ 409 AlreadyExists (a concurrent caller won)
//!        ▼
//!   re-read secret ───────────────────────────────────────────► winner's public half
//! ```
//!
//! No in-process lock is held across any of these calls; the API server's
//! create-if-absent semantics arbitrate the race.

use super::record::{decode_key_pair_secret, decode_public_key, key_pair_secret};
use super::{validate_namespace, KeyStore, KeyStoreError};
use crate::cluster::{ClusterError, SecretApi};
use crate::codec;
use crate::constants::KEY_PAIR_SECRET_NAME;
use crate::observability::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Owns the key pairs of every namespace
#[derive(Clone)]
pub struct KeyManager {
    secrets: Arc<dyn SecretApi>,
    key_bits: usize,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("key_bits", &self.key_bits)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    pub fn new(secrets: Arc<dyn SecretApi>, key_bits: usize) -> Self {
        Self { secrets, key_bits }
    }

    async fn generate(&self, namespace: &str) -> Result<codec::KeyPair, KeyStoreError> {
        let bits = self.key_bits;
        let start = Instant::now();
        let pair = tokio::task::spawn_blocking(move || codec::generate_key_pair(bits))
            .await
            .map_err(|e| KeyStoreError::Internal(format!("key generation task failed: {e}")))??;
        metrics::observe_keygen_duration(start.elapsed().as_secs_f64());
        debug!(namespace, bits, "Generated key pair candidate");
        Ok(pair)
    }

    async fn read_public(&self, namespace: &str) -> Result<Option<String>, KeyStoreError> {
        match self.secrets.get(namespace, KEY_PAIR_SECRET_NAME).await? {
            Some(secret) => Ok(Some(decode_public_key(namespace, &secret)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl KeyStore for KeyManager {
    async fn public_key(&self, namespace: &str) -> Result<String, KeyStoreError> {
        validate_namespace(namespace)?;

        if let Some(public_key) = self.read_public(namespace).await? {
            return Ok(public_key);
        }

        let pair = self.generate(namespace).await?;
        let secret = key_pair_secret(namespace, &pair);

        match self.secrets.create(namespace, &secret).await {
            Ok(_) => {
                info!(namespace, "🔑 Created key pair");
                metrics::increment_key_pairs_created();
                Ok(pair.public_key)
            }
            Err(ClusterError::AlreadyExists(_)) => {
                warn!(
                    namespace,
                    "Key pair was created concurrently, discarding local candidate"
                );
                metrics::increment_key_create_races();
                self.read_public(namespace).await?.ok_or_else(|| {
                    KeyStoreError::Unavailable(format!(
                        "key pair in namespace '{namespace}' was reported as existing but could not be read"
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn private_key(&self, namespace: &str) -> Result<Zeroizing<String>, KeyStoreError> {
        validate_namespace(namespace)?;

        let secret = self
            .secrets
            .get(namespace, KEY_PAIR_SECRET_NAME)
            .await?
            .ok_or_else(|| KeyStoreError::KeyNotFound(namespace.to_owned()))?;
        Ok(decode_key_pair_secret(namespace, &secret)?.private_key)
    }
}
