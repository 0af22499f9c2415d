//! # Injection State Machine
//!
//! The annotation contract on a deployment, made explicit:
//!
//! | State              | Annotations                                        |
//! |--------------------|----------------------------------------------------|
//! | `Unannotated`      | no `heimdall-repository`                           |
//! | `PendingInjection` | repository, no `heimdall-injected`                 |
//! | `Injected`         | repository and `heimdall-injected`                 |
//!
//! `PendingInjection -> Injected` is the only transition the controller
//! performs, through [`apply_injection`]. Both other states are terminal.
//! A missing `heimdall-path` still counts as pending: the pipeline reports it
//! as a path that does not exist instead of the deployment being ignored.
//! A changed repository or path on an `Injected` deployment is not
//! re-processed; removing `heimdall-injected` is how an operator asks for a
//! fresh injection.

use crate::cluster::ObjectKey;
use crate::constants::{
    ANNOTATION_CONFIG_VERSION, ANNOTATION_INJECTED, ANNOTATION_NAME, ANNOTATION_PATH,
    ANNOTATION_REPOSITORY, INJECTED_MARKER_VALUE, RESOURCE_NAME_PREFIX,
};
use crate::materializer::ResourceRef;
use crate::model::Configuration;
use crate::source::SourceReference;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMapEnvSource, EnvFromSource};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionState {
    Unannotated,
    PendingInjection(SourceReference),
    Injected,
}

fn annotation<'a>(deployment: &'a Deployment, key: &str) -> Option<&'a str> {
    deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Value of the injected marker, `None` when absent
pub fn injected_marker(deployment: &Deployment) -> Option<&str> {
    deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_INJECTED))
        .map(String::as_str)
}

impl InjectionState {
    /// Classify a deployment by its annotations
    pub fn of(deployment: &Deployment) -> Self {
        let Some(repository) = annotation(deployment, ANNOTATION_REPOSITORY) else {
            return Self::Unannotated;
        };
        let path = annotation(deployment, ANNOTATION_PATH).unwrap_or_default();

        if injected_marker(deployment).is_some() {
            return Self::Injected;
        }

        Self::PendingInjection(SourceReference {
            repository: repository.to_owned(),
            path: path.to_owned(),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unannotated => "unannotated",
            Self::PendingInjection(_) => "pending_injection",
            Self::Injected => "injected",
        }
    }
}

/// The deployment as it must look after a successful injection
///
/// Writes the marker, name and version annotations and, when a config map
/// was published, references it from every container's `envFrom` (once).
/// Unrelated annotations and containers' existing `envFrom` entries are kept.
pub fn apply_injection(
    deployment: &Deployment,
    configuration: &Configuration,
    resource: Option<&ResourceRef>,
) -> Deployment {
    let mut updated = deployment.clone();

    let annotations = updated
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new);
    annotations.insert(ANNOTATION_INJECTED.to_owned(), INJECTED_MARKER_VALUE.to_owned());
    annotations.insert(ANNOTATION_NAME.to_owned(), configuration.metadata.name.clone());
    annotations.insert(
        ANNOTATION_CONFIG_VERSION.to_owned(),
        configuration.config_version.clone(),
    );

    if let Some(resource) = resource {
        let containers = updated
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
            .map(|pod| pod.containers.iter_mut());

        for container in containers.into_iter().flatten() {
            let env_from = container.env_from.get_or_insert_with(Vec::new);
            let present = env_from.iter().any(|source| {
                source
                    .config_map_ref
                    .as_ref()
                    .is_some_and(|r| r.name == resource.name)
            });
            if !present {
                env_from.push(EnvFromSource {
                    config_map_ref: Some(ConfigMapEnvSource {
                        name: resource.name.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
        }
    }

    updated
}

/// Config map to delete when an injected deployment goes away
pub fn cleanup_target(deployment: &Deployment) -> Option<ObjectKey> {
    injected_marker(deployment)?;
    let namespace = deployment.metadata.namespace.as_deref()?;
    let name = annotation(deployment, ANNOTATION_NAME)?;
    let version = annotation(deployment, ANNOTATION_CONFIG_VERSION)?;
    Some(ObjectKey::new(
        namespace,
        format!("{RESOURCE_NAME_PREFIX}-{name}-{version}"),
    ))
}
