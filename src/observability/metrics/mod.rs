//! # Metrics Module
//!
//! Prometheus metrics, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and text encoding
//! - `controller_metrics` - Injection controller metrics (injections, requeues, drops, cache)
//! - `processing_metrics` - Pipeline stage metrics (repository fetches, decryption)
//! - `keys_metrics` - Key service metrics (requests, key pair creation)

pub mod controller_metrics;
pub mod keys_metrics;
pub mod processing_metrics;
pub mod registry;

pub use controller_metrics::*;
pub use keys_metrics::*;
pub use processing_metrics::*;
pub use registry::*;
