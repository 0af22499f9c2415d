//! # Deployment Informer
//!
//! Applies `kube_runtime::watcher` events to a `kube_runtime::reflector`
//! store and reports what changed as [`WorkloadEvent`]s.
//!
//! Each event is classified against the store *before* it is written, so an
//! update still sees the previous object. Events of a (re)list are held back
//! until `InitDone` has swapped the new list into the store; deployments that
//! vanished while the watch was down are reported as deleted at that point.

use super::events::WorkloadEvent;
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::Deployment;
use kube_runtime::reflector::{self, ObjectRef, Store};
use kube_runtime::watcher;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Progress of the list currently being received
#[derive(Debug, Default)]
struct Relist {
    seen: HashSet<ObjectRef<Deployment>>,
    events: Vec<WorkloadEvent>,
}

#[derive(Debug)]
pub struct Informer {
    writer: reflector::store::Writer<Deployment>,
    reader: Store<Deployment>,
    relist: Option<Relist>,
}

impl Default for Informer {
    fn default() -> Self {
        let (reader, writer) = reflector::store();
        Self {
            writer,
            reader,
            relist: None,
        }
    }
}

fn same_revision(a: &Deployment, b: &Deployment) -> bool {
    match (&a.metadata.resource_version, &b.metadata.resource_version) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

impl Informer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read handle on the cached deployments
    pub fn store(&self) -> Store<Deployment> {
        self.reader.clone()
    }

    /// Classify `deployment` against what the store holds for it
    fn diff(&self, deployment: &Deployment) -> Option<WorkloadEvent> {
        let new = Arc::new(deployment.clone());
        match self.reader.get(&ObjectRef::from_obj(deployment)) {
            None => Some(WorkloadEvent::Created(new)),
            Some(old) if same_revision(&old, deployment) => None,
            Some(old) => Some(WorkloadEvent::Updated { old, new }),
        }
    }

    /// Apply one watcher event and return the resulting workload events
    pub fn apply(&mut self, event: &watcher::Event<Deployment>) -> Vec<WorkloadEvent> {
        let events = match event {
            watcher::Event::Init => {
                debug!("Deployment list started");
                self.relist = Some(Relist::default());
                Vec::new()
            }
            watcher::Event::InitApply(deployment) => {
                let changed = self.diff(deployment);
                let relist = self.relist.get_or_insert_with(Relist::default);
                relist.seen.insert(ObjectRef::from_obj(deployment));
                relist.events.extend(changed);
                Vec::new()
            }
            watcher::Event::InitDone => {
                let relist = self.relist.take().unwrap_or_default();
                let mut events = relist.events;
                events.extend(
                    self.reader
                        .state()
                        .into_iter()
                        .filter(|cached| {
                            !relist.seen.contains(&ObjectRef::from_obj(cached.as_ref()))
                        })
                        .map(WorkloadEvent::Deleted),
                );
                events
            }
            watcher::Event::Apply(deployment) => self.diff(deployment).into_iter().collect(),
            watcher::Event::Delete(deployment) => {
                vec![WorkloadEvent::Deleted(Arc::new(deployment.clone()))]
            }
        };

        self.writer.apply_watcher_event(event);
        if matches!(event, watcher::Event::InitDone) {
            debug!(deployments = self.reader.len(), "Deployment list complete");
        }
        metrics::set_cached_deployments(self.reader.len());
        events
    }
}
