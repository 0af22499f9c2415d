//! Kubernetes-backed implementations of the cluster traits.

use super::{ClusterError, ConfigMapApi, DeploymentApi, SecretApi};
use crate::constants::FIELD_MANAGER;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

/// Cluster access through a shared kube [`Client`]
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_owned()),
            ..Default::default()
        }
    }
}

fn object_name<K: kube::Resource>(obj: &K) -> Result<&str, ClusterError> {
    obj.meta()
        .name
        .as_deref()
        .ok_or_else(|| ClusterError::Client("object has no metadata.name".to_owned()))
}

#[async_trait]
impl SecretApi for KubeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("secret {namespace}/{name}")))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let name = object_name(secret)?;
        api.create(&Self::post_params(), secret)
            .await
            .map_err(|e| ClusterError::on_create(e, &format!("secret {namespace}/{name}")))
    }
}

#[async_trait]
impl ConfigMapApi for KubeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("configmap {namespace}/{name}")))
    }

    async fn create(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let name = object_name(config_map)?;
        api.create(&Self::post_params(), config_map)
            .await
            .map_err(|e| ClusterError::on_create(e, &format!("configmap {namespace}/{name}")))
    }

    async fn replace(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ConfigMap, ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let name = object_name(config_map)?;
        api.replace(name, &Self::post_params(), config_map)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("configmap {namespace}/{name}")))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(ClusterError::from_kube(e, &format!("configmap {namespace}/{name}"))),
        }
    }
}

#[async_trait]
impl DeploymentApi for KubeCluster {
    async fn replace(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let name = object_name(deployment)?;
        api.replace(name, &Self::post_params(), deployment)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("deployment {namespace}/{name}")))
    }
}
