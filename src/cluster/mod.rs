//! # Cluster Access
//!
//! Narrow, object-safe views of the Kubernetes API used by the key store and
//! the injector. Production code uses [`KubeCluster`]; tests supply in-memory
//! implementations.

mod client;

pub use client::KubeCluster;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use thiserror::Error;

/// Namespace + name of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build a key from object metadata, `None` if either part is missing
    pub fn from_meta(
        meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    ) -> Option<Self> {
        Some(Self::new(meta.namespace.clone()?, meta.name.clone()?))
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kubernetes API failures, classified by what callers need to branch on
#[derive(Debug, Error)]
pub enum ClusterError {
    /// 404
    #[error("{0} not found")]
    NotFound(String),
    /// 409 on create
    #[error("{0} already exists")]
    AlreadyExists(String),
    /// 409 on update (stale resourceVersion)
    #[error("conflicting update to {0}")]
    Conflict(String),
    /// Anything else the API server or transport reported
    #[error("Kubernetes API error ({code}): {message}")]
    Api { code: u16, message: String },
    /// Client side failure before a response was received
    #[error("Kubernetes client error: {0}")]
    Client(String),
}

impl ClusterError {
    /// Map a create failure
    pub fn on_create(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::AlreadyExists(what.to_owned()),
            other => Self::from_kube(other, what),
        }
    }

    /// Map a read, replace or delete failure
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound(what.to_owned()),
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict(what.to_owned()),
            kube::Error::Api(ae) => Self::Api {
                code: ae.code,
                message: ae.message,
            },
            other => Self::Client(other.to_string()),
        }
    }
}

/// Read and conditionally create secrets (key pair storage)
#[async_trait]
pub trait SecretApi: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError>;

    /// Create; fails with [`ClusterError::AlreadyExists`] if the name is taken
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError>;
}

/// Config map storage for materialized configuration
#[async_trait]
pub trait ConfigMapApi: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError>;

    async fn create(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError>;

    /// Replace the whole object; fails with [`ClusterError::Conflict`] on a stale resourceVersion
    async fn replace(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError>;

    /// Delete; `Ok(false)` if it did not exist
    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, ClusterError>;
}

/// Workload updates
#[async_trait]
pub trait DeploymentApi: Send + Sync {
    async fn replace(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError>;
}
