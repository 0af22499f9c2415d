//! # Configuration Materializer
//!
//! Turns a parsed [`Configuration`] into the config map
//! `heimdall-<name>-<version>` in the configuration's namespace.
//!
//! Every value is resolved (plain values copied, encrypted values decrypted)
//! before anything is written, so a single failing entity aborts the whole
//! materialization and no partially populated config map is ever published.

use crate::cluster::{ClusterError, ConfigMapApi, ObjectKey};
use crate::codec::{self, CodecError};
use crate::constants::{LABEL_MANAGED_BY, MANAGED_BY_VALUE};
use crate::keys::{KeyStore, KeyStoreError};
use crate::model::Configuration;
use crate::observability::metrics;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rsa::RsaPrivateKey;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Name and namespace of a materialized config map
pub type ResourceRef = ObjectKey;

/// Materialization failures
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Fetching the private key failed (including `KeyNotFound`)
    #[error("failed to obtain private key: {0}")]
    KeyStore(#[from] KeyStoreError),
    /// The stored private key could not be parsed
    #[error("private key for namespace '{namespace}' is unusable: {source}")]
    PrivateKey {
        namespace: String,
        #[source]
        source: CodecError,
    },
    /// An encrypted entity could not be decrypted
    #[error("failed to decrypt entity '{entity}'")]
    Decrypt { entity: String },
    /// Reading or writing the config map failed
    #[error("failed to write config map: {0}")]
    Cluster(#[from] ClusterError),
}

/// Writes configurations into config maps
#[derive(Clone)]
pub struct Materializer {
    key_store: Arc<dyn KeyStore>,
    config_maps: Arc<dyn ConfigMapApi>,
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer").finish_non_exhaustive()
    }
}

/// Deterministic config map name for a configuration
pub fn resource_name(configuration: &Configuration) -> String {
    configuration.resource_name()
}

impl Materializer {
    pub fn new(key_store: Arc<dyn KeyStore>, config_maps: Arc<dyn ConfigMapApi>) -> Self {
        Self {
            key_store,
            config_maps,
        }
    }

    async fn private_key(&self, namespace: &str) -> Result<RsaPrivateKey, MaterializeError> {
        let pem = self.key_store.private_key(namespace).await?;
        codec::parse_private_key(&pem).map_err(|source| MaterializeError::PrivateKey {
            namespace: namespace.to_owned(),
            source,
        })
    }

    /// Resolve every entity to its final value
    async fn resolve_values(
        &self,
        configuration: &Configuration,
    ) -> Result<BTreeMap<String, String>, MaterializeError> {
        let namespace = &configuration.metadata.namespace;
        let private_key = if configuration.has_encrypted_entities() {
            Some(self.private_key(namespace).await?)
        } else {
            None
        };

        let mut data = BTreeMap::new();
        let mut decrypted = 0usize;
        for entity in &configuration.entities {
            let value = match (&private_key, entity.encrypted) {
                (Some(key), true) => {
                    let plaintext = codec::decrypt(key, &entity.value).map_err(|_| {
                        metrics::increment_decryption_errors();
                        MaterializeError::Decrypt {
                            entity: entity.name.clone(),
                        }
                    })?;
                    decrypted += 1;
                    plaintext.as_str().to_owned()
                }
                _ => entity.value.clone(),
            };
            data.insert(entity.name.clone(), value);
        }

        if decrypted > 0 {
            metrics::increment_values_decrypted(decrypted);
        }
        Ok(data)
    }

    /// Create or update the config map for `configuration`
    ///
    /// Returns `None` for a configuration without entities: nothing is
    /// published and no key is requested.
    ///
    /// # Errors
    ///
    /// See [`MaterializeError`]. On error nothing has been written.
    pub async fn materialize(
        &self,
        configuration: &Configuration,
    ) -> Result<Option<ResourceRef>, MaterializeError> {
        let target = ResourceRef::new(
            configuration.metadata.namespace.clone(),
            resource_name(configuration),
        );

        if configuration.entities.is_empty() {
            info!(config_map = %target, "Configuration has no entities, nothing to materialize");
            return Ok(None);
        }

        let data = self.resolve_values(configuration).await?;
        self.write(&target, data).await?;
        Ok(Some(target))
    }

    async fn write(
        &self,
        target: &ResourceRef,
        data: BTreeMap<String, String>,
    ) -> Result<(), MaterializeError> {
        let namespace = target.namespace.as_str();

        let existing = match self.config_maps.get(namespace, &target.name).await? {
            Some(existing) => existing,
            None => match self.config_maps.create(namespace, &desired(target, data.clone())).await {
                Ok(_) => {
                    info!(config_map = %target, keys = data.len(), "📝 Created config map");
                    metrics::increment_configmap_writes("created");
                    return Ok(());
                }
                Err(ClusterError::AlreadyExists(_)) => {
                    debug!(
                        config_map = %target,
                        "Config map appeared concurrently, updating instead"
                    );
                    self.config_maps
                        .get(namespace, &target.name)
                        .await?
                        .ok_or_else(|| ClusterError::Conflict(format!("configmap {target}")))?
                }
                Err(e) => return Err(e.into()),
            },
        };

        if existing.data.as_ref() == Some(&data)
            && existing.binary_data.is_none()
            && is_managed(&existing)
        {
            debug!(config_map = %target, "Config map already up to date");
            metrics::increment_configmap_writes("unchanged");
            return Ok(());
        }

        let mut updated = existing;
        updated.data = Some(data);
        updated.binary_data = None;
        updated
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(LABEL_MANAGED_BY.to_owned(), MANAGED_BY_VALUE.to_owned());

        self.config_maps.replace(namespace, &updated).await?;
        info!(config_map = %target, "📝 Replaced config map data");
        metrics::increment_configmap_writes("updated");
        Ok(())
    }
}

fn is_managed(config_map: &ConfigMap) -> bool {
    config_map
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_MANAGED_BY))
        .is_some_and(|v| v == MANAGED_BY_VALUE)
}

fn desired(target: &ResourceRef, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(target.name.clone()),
            namespace: Some(target.namespace.clone()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED_BY.to_owned(),
                MANAGED_BY_VALUE.to_owned(),
            )])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}
