//! gRPC protocol definitions for the key service
//!
//! Generated from `proto/heimdall/keys/v1/keys.proto`.
//!
//! # Example
//!
//! ```ignore
//! use heimdall::keys::proto::heimdall_keys_client::HeimdallKeysClient;
//! use heimdall::keys::proto::Namespace;
//!
//! let mut client = HeimdallKeysClient::connect("http://heimdall-keys:8080").await?;
//! let key = client
//!     .get_public_key(Namespace { namespace: "ns1".into() })
//!     .await?
//!     .into_inner()
//!     .key;
//! ```

#![allow(missing_docs, reason = "Generated code doesn't have docs")]
#![allow(clippy::pedantic, reason = "Generated code")]
#![allow(clippy::default_trait_access, reason = "Generated code")]

tonic::include_proto!("heimdall.keys.v1");
