//! # Workload Events
//!
//! Deployment changes as a tagged variant, and the single handler that
//! decides which of them become work queue keys.

use super::state::{cleanup_target, injected_marker, InjectionState};
use super::QueueKey;
use crate::cluster::ObjectKey;
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub enum WorkloadEvent {
    Created(Arc<Deployment>),
    Updated {
        old: Arc<Deployment>,
        new: Arc<Deployment>,
    },
    /// Last known state of the deleted deployment
    Deleted(Arc<Deployment>),
}

impl WorkloadEvent {
    /// Key of the affected deployment
    pub fn key(&self) -> Option<ObjectKey> {
        let deployment = match self {
            WorkloadEvent::Created(d) | WorkloadEvent::Deleted(d) => d,
            WorkloadEvent::Updated { new, .. } => new,
        };
        ObjectKey::from_meta(&deployment.metadata)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadEvent::Created(_) => "created",
            WorkloadEvent::Updated { .. } => "updated",
            WorkloadEvent::Deleted(_) => "deleted",
        }
    }
}

/// Decides which workload events need work
#[derive(Debug, Clone, Copy)]
pub struct EventHandler {
    configmap_cleanup: bool,
}

impl EventHandler {
    pub fn new(configmap_cleanup: bool) -> Self {
        Self { configmap_cleanup }
    }

    /// Key to schedule for `event`, if any
    pub fn handle(&self, event: &WorkloadEvent) -> Option<QueueKey> {
        metrics::increment_watch_events(event.as_str());
        match event {
            WorkloadEvent::Created(deployment) => Self::on_created(deployment),
            WorkloadEvent::Updated { old, new } => Self::on_updated(old, new),
            WorkloadEvent::Deleted(deployment) => self.on_deleted(deployment),
        }
    }

    fn on_created(deployment: &Deployment) -> Option<QueueKey> {
        if !matches!(
            InjectionState::of(deployment),
            InjectionState::PendingInjection(_)
        ) {
            return None;
        }
        let key = ObjectKey::from_meta(&deployment.metadata)?;
        debug!(deployment = %key, "Queueing new deployment");
        Some(QueueKey::Workload(key))
    }

    /// Only a change of the injected marker is interesting; spec churn is not
    fn on_updated(old: &Deployment, new: &Deployment) -> Option<QueueKey> {
        if injected_marker(old) == injected_marker(new) {
            return None;
        }
        let key = ObjectKey::from_meta(&new.metadata)?;
        debug!(deployment = %key, "Queueing deployment with changed injection marker");
        Some(QueueKey::Workload(key))
    }

    fn on_deleted(&self, deployment: &Deployment) -> Option<QueueKey> {
        if !self.configmap_cleanup {
            return None;
        }
        let target = cleanup_target(deployment)?;
        info!(config_map = %target, "Injected deployment deleted, queueing config map cleanup");
        Some(QueueKey::Cleanup(target))
    }
}
