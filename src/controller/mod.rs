//! # Injection Controller
//!
//! Watches deployments, triggers reconciles of the ones waiting for
//! configuration and runs the injection pipeline on them.
//!
//! ```text
//! watcher ──► Informer ──► EventHandler ──┬──► applier ──► reconcile
//!                │                        │       │
//!                │                        └──► cleanup
//!                └──► reflector store ◄── lookup ─┘
//! ```

pub mod backoff;
pub mod error;
pub mod events;
pub mod informer;
pub mod injector;
pub mod reconciler;
pub mod state;

pub use backoff::FibonacciBackoff;
pub use error::{ErrorClass, InjectionError};
pub use events::{EventHandler, WorkloadEvent};
pub use informer::Informer;
pub use injector::Injector;
pub use reconciler::{reconcile, Reconciler};
pub use state::InjectionState;

use crate::cluster::ObjectKey;

/// Work requested by a deployment event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueKey {
    /// Reconcile this deployment
    Workload(ObjectKey),
    /// Delete this config map
    Cleanup(ObjectKey),
}
