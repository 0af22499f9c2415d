//! # Injection Pipeline
//!
//! One pass over a pending deployment: fetch and parse the referenced
//! configuration, materialize it, then mark the deployment injected.
//! The deployment is only written after the config map exists.

use super::error::InjectionError;
use super::state::apply_injection;
use crate::cluster::{ConfigMapApi, DeploymentApi, ObjectKey, SecretApi};
use crate::materializer::{Materializer, ResourceRef};
use crate::observability::metrics;
use crate::source::{ConfigurationSource, Credential, CredentialHosts, SecretRef, SourceReference};
use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Injector {
    source: Arc<dyn ConfigurationSource>,
    materializer: Materializer,
    deployments: Arc<dyn DeploymentApi>,
    config_maps: Arc<dyn ConfigMapApi>,
    secrets: Arc<dyn SecretApi>,
    credentials: Option<SecretRef>,
    credential_hosts: CredentialHosts,
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field("credentials", &self.credentials)
            .field("credential_hosts", &self.credential_hosts)
            .finish_non_exhaustive()
    }
}

impl Injector {
    pub fn new(
        source: Arc<dyn ConfigurationSource>,
        materializer: Materializer,
        deployments: Arc<dyn DeploymentApi>,
        config_maps: Arc<dyn ConfigMapApi>,
        secrets: Arc<dyn SecretApi>,
    ) -> Self {
        Self {
            source,
            materializer,
            deployments,
            config_maps,
            secrets,
            credentials: None,
            credential_hosts: CredentialHosts::default(),
        }
    }

    /// Authenticate fetches from `hosts` with the `username` / `password`
    /// of this secret
    #[must_use]
    pub fn with_credentials(
        mut self,
        credentials: Option<SecretRef>,
        hosts: CredentialHosts,
    ) -> Self {
        self.credentials = credentials;
        self.credential_hosts = hosts;
        self
    }

    /// Credential for a fetch of `repository`, if it may have one
    async fn credential(&self, repository: &str) -> Result<Option<Credential>, InjectionError> {
        let Some(reference) = &self.credentials else {
            return Ok(None);
        };
        if !self.credential_hosts.permits(repository) {
            warn!(
                repository,
                allowed = %self.credential_hosts,
                "Repository host is not allowed to receive credentials, fetching anonymously"
            );
            return Ok(None);
        }
        Ok(Some(Credential::load(self.secrets.as_ref(), reference).await?))
    }

    /// Inject the configuration at `reference` into `deployment`
    ///
    /// # Errors
    ///
    /// Any step failing aborts the pass; see [`InjectionError::class`] for
    /// whether a retry makes sense.
    pub async fn inject(
        &self,
        deployment: &Deployment,
        reference: &SourceReference,
    ) -> Result<Option<ResourceRef>, InjectionError> {
        let workload_namespace = deployment
            .metadata
            .namespace
            .as_deref()
            .ok_or(InjectionError::InvalidWorkload("a namespace"))?;
        if deployment.metadata.name.is_none() {
            return Err(InjectionError::InvalidWorkload("a name"));
        }

        let credential = self.credential(&reference.repository).await?;
        let configuration = self.source.resolve(reference, credential.as_ref()).await?;
        debug!(
            configuration = %configuration.metadata.name,
            version = %configuration.config_version,
            entities = configuration.entities.len(),
            "Resolved configuration"
        );

        if configuration.metadata.namespace != workload_namespace {
            return Err(InjectionError::NamespaceMismatch {
                workload: workload_namespace.to_owned(),
                configuration: configuration.metadata.namespace.clone(),
            });
        }

        let resource = self.materializer.materialize(&configuration).await?;
        let updated = apply_injection(deployment, &configuration, resource.as_ref());
        self.deployments.replace(workload_namespace, &updated).await?;

        match &resource {
            Some(resource) => info!(config_map = %resource, "💉 Injected configuration"),
            None => info!("💉 Marked deployment injected (configuration has no entities)"),
        }
        Ok(resource)
    }

    /// Delete the config map left behind by a deleted deployment
    ///
    /// A config map that is already gone counts as cleaned up.
    ///
    /// # Errors
    ///
    /// Returns [`InjectionError::Cluster`] if the delete fails.
    pub async fn cleanup(&self, target: &ObjectKey) -> Result<(), InjectionError> {
        if self.config_maps.delete(&target.namespace, &target.name).await? {
            info!(config_map = %target, "🧹 Deleted config map of removed deployment");
            metrics::increment_configmap_cleanups();
        } else {
            debug!(config_map = %target, "Config map already gone");
        }
        Ok(())
    }
}
