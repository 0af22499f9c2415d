//! Shared fixtures for the integration tests
//!
//! - [`FakeCluster`]: in-memory secrets, config maps and deployments with
//!   write counters and injectable failures
//! - [`FakeTransport`]: repositories served from memory, optionally failing
//! - [`PAIR`]: one RSA key pair generated per test binary

#![allow(dead_code, reason = "Each test binary uses a different subset")]

use async_trait::async_trait;
use heimdall::cluster::{ClusterError, ConfigMapApi, DeploymentApi, SecretApi};
use heimdall::codec::{self, KeyPair};
use heimdall::keys::key_pair_secret;
use heimdall::source::{Credential, SourceError, SourceTransport, SourceTree};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodSpec, PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};

pub static PAIR: LazyLock<KeyPair> =
    LazyLock::new(|| codec::generate_key_pair(2048).expect("key generation"));

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_owned(), name.to_owned())
}

/// Decrement `counter` if it is positive
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn name_of(meta: &ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    pub secrets: Mutex<HashMap<Key, Secret>>,
    pub config_maps: Mutex<HashMap<Key, ConfigMap>>,
    pub deployments: Mutex<HashMap<Key, Deployment>>,

    pub secret_creates: AtomicUsize,
    pub config_map_writes: AtomicUsize,
    pub config_map_deletes: AtomicUsize,
    pub deployment_replaces: AtomicUsize,

    /// Every config map write fails with 503 while set
    pub fail_config_map_writes: AtomicBool,
    /// Number of upcoming deployment replaces that fail with a conflict
    pub deployment_conflicts: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster with the shared key pair stored for `namespace`
    pub fn with_key_pair(namespace: &str) -> Self {
        let cluster = Self::new();
        cluster
            .secrets
            .lock()
            .unwrap()
            .insert(key(namespace, "heimdall"), key_pair_secret(namespace, &PAIR));
        cluster
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.deployments.lock().unwrap().get(&key(namespace, name)).cloned()
    }

    pub fn writes(&self) -> usize {
        self.config_map_writes.load(Ordering::SeqCst)
            + self.deployment_replaces.load(Ordering::SeqCst)
    }

    fn config_map_outage(&self) -> Result<(), ClusterError> {
        if self.fail_config_map_writes.load(Ordering::SeqCst) {
            return Err(ClusterError::Api {
                code: 503,
                message: "etcd unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SecretApi for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        Ok(self.secrets.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        self.secret_creates.fetch_add(1, Ordering::SeqCst);
        let mut secrets = self.secrets.lock().unwrap();
        let k = key(namespace, &name_of(&secret.metadata));
        if secrets.contains_key(&k) {
            return Err(ClusterError::AlreadyExists(format!("secret {}/{}", k.0, k.1)));
        }
        secrets.insert(k, secret.clone());
        Ok(secret.clone())
    }
}

#[async_trait]
impl ConfigMapApi for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        Ok(self.config_map(namespace, name))
    }

    async fn create(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError> {
        self.config_map_outage()?;
        let mut config_maps = self.config_maps.lock().unwrap();
        let k = key(namespace, &name_of(&config_map.metadata));
        if config_maps.contains_key(&k) {
            return Err(ClusterError::AlreadyExists(format!("configmap {}/{}", k.0, k.1)));
        }
        self.config_map_writes.fetch_add(1, Ordering::SeqCst);
        config_maps.insert(k, config_map.clone());
        Ok(config_map.clone())
    }

    async fn replace(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError> {
        self.config_map_outage()?;
        let mut config_maps = self.config_maps.lock().unwrap();
        let k = key(namespace, &name_of(&config_map.metadata));
        if !config_maps.contains_key(&k) {
            return Err(ClusterError::NotFound(format!("configmap {}/{}", k.0, k.1)));
        }
        self.config_map_writes.fetch_add(1, Ordering::SeqCst);
        config_maps.insert(k, config_map.clone());
        Ok(config_map.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let removed = self.config_maps.lock().unwrap().remove(&key(namespace, name));
        if removed.is_some() {
            self.config_map_deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed.is_some())
    }
}

#[async_trait]
impl DeploymentApi for FakeCluster {
    async fn replace(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        if take_one(&self.deployment_conflicts) {
            return Err(ClusterError::Conflict(format!(
                "deployment {namespace}/{}",
                name_of(&deployment.metadata)
            )));
        }
        self.deployment_replaces.fetch_add(1, Ordering::SeqCst);
        self.deployments
            .lock()
            .unwrap()
            .insert(key(namespace, &name_of(&deployment.metadata)), deployment.clone());
        Ok(deployment.clone())
    }
}

/// Repositories kept in memory
#[derive(Debug, Default)]
pub struct FakeTransport {
    pub repositories: Mutex<HashMap<String, SourceTree>>,
    pub fetches: AtomicUsize,
    /// Every fetch fails as unreachable while set
    pub unreachable: AtomicBool,
    /// Number of upcoming fetches that fail as unreachable
    pub failing_fetches: AtomicUsize,
    pub last_credential: Mutex<Option<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(repository: &str, path: &str, contents: &str) -> Self {
        let transport = Self::new();
        transport.put(repository, path, contents);
        transport
    }

    pub fn put(&self, repository: &str, path: &str, contents: &str) {
        self.repositories
            .lock()
            .unwrap()
            .entry(repository.to_owned())
            .or_default()
            .insert(path, contents.as_bytes().to_vec());
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceTransport for FakeTransport {
    async fn fetch(
        &self,
        repository: &str,
        credential: Option<&Credential>,
    ) -> Result<SourceTree, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_credential.lock().unwrap() = credential.map(|c| c.username.clone());
        if self.unreachable.load(Ordering::SeqCst) || take_one(&self.failing_fetches) {
            return Err(SourceError::Unreachable(format!(
                "could not resolve host for {repository}"
            )));
        }
        self.repositories
            .lock()
            .unwrap()
            .get(repository)
            .cloned()
            .ok_or_else(|| SourceError::Unreachable(format!("repository {repository} not found")))
    }
}

pub const REPOSITORY: &str = "https://git.example.com/config.git";

/// Deployment `web` in `namespace` with two containers and the given annotations
pub fn deployment(namespace: &str, annotations: &[(&str, &str)]) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some("web".into()),
            namespace: Some(namespace.into()),
            resource_version: Some("1".into()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                spec: Some(PodSpec {
                    containers: vec![
                        Container {
                            name: "app".into(),
                            ..Default::default()
                        },
                        Container {
                            name: "proxy".into(),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Deployment annotated to receive `path` from [`REPOSITORY`]
pub fn pending_deployment(namespace: &str, path: &str) -> Deployment {
    deployment(
        namespace,
        &[("heimdall-repository", REPOSITORY), ("heimdall-path", path)],
    )
}

/// Configuration document with one plain and one encrypted entity
pub fn document(namespace: &str, version: &str, plain: &str, secret: &str) -> String {
    let ciphertext = codec::encrypt(&PAIR.public_key, secret).expect("encrypt");
    format!(
        "configVersion: {version}
metadata:
  author: ops
  name: app
  namespace: {namespace}
configuration:
  - name: LOG_LEVEL
    value: {plain}
  - name: DB_PASSWORD
    value: {ciphertext}
    encrypted: true
"
    )
}
