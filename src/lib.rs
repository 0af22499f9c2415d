//! # Heimdall
//!
//! A Kubernetes controller that injects configuration kept in Git into
//! deployments.
//!
//! ## Overview
//!
//! 1. **Annotated deployments** - a deployment opts in with the
//!    `heimdall-repository` and `heimdall-path` annotations
//! 2. **Fetching** - the referenced YAML document is read from the repository
//! 3. **Decryption** - values marked `encrypted` are decrypted with the
//!    private key of the configuration's namespace, obtained from the key
//!    service (`heimdall-keys`) over gRPC
//! 4. **Materialization** - the values are written to the config map
//!    `heimdall-<name>-<version>`
//! 5. **Injection** - every container gets an `envFrom` reference to the
//!    config map and the deployment is marked `heimdall-injected`
//!
//! Values are encrypted offline with the `heimdall inject` CLI using the
//! namespace's public key (RSA-OAEP, SHA-512).

pub mod cluster;
pub mod codec;
pub mod config;
pub mod constants;
pub mod controller;
pub mod keys;
pub mod materializer;
pub mod model;
pub mod observability;
pub mod runtime;
pub mod source;
pub mod validation;
