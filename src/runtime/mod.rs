//! # Runtime Module
//!
//! Process level plumbing shared by the injector and the key service:
//! initialization, the deployment watch loop, watch error handling and
//! signal driven shutdown.

pub mod error_policy;
pub mod initialization;
pub mod shutdown;
pub mod watch_loop;

pub use error_policy::*;
pub use initialization::*;
pub use shutdown::*;
pub use watch_loop::*;
