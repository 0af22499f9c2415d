//! # Configuration Source
//!
//! Resolves a repository reference and a path into a parsed
//! [`Configuration`](crate::model::Configuration).
//!
//! The transport (how bytes leave the repository) is pluggable through
//! [`SourceTransport`]; the resolver only decides what to open and how to
//! parse it. Nothing here retries; retry policy belongs to the caller.

mod credentials;
mod git;
mod pack;
mod pkt_line;
mod tree;

pub use credentials::{Credential, CredentialHosts, SecretRef, PASSWORD_FIELD, USERNAME_FIELD};
pub use git::{HttpGitTransport, SourceTransport};
pub use tree::SourceTree;

use crate::model::{Configuration, DocumentError};
use crate::observability::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info_span, Instrument};

/// Where a workload's configuration lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceReference {
    /// Repository URL
    pub repository: String,
    /// Path of the document inside the repository
    pub path: String,
}

impl std::fmt::Display for SourceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.repository, self.path)
    }
}

/// Resolver failures
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network, authentication or transport failure
    #[error("configuration source unreachable: {0}")]
    Unreachable(String),
    /// The repository has no file at the requested path
    #[error("path '{path}' not found in {repository}")]
    PathNotFound { repository: String, path: String },
    /// The document could not be parsed or failed validation
    #[error("configuration document malformed: {0}")]
    Malformed(#[from] DocumentError),
    /// Repository credentials could not be loaded
    #[error("repository credentials unavailable: {0}")]
    Credential(String),
}

impl SourceError {
    /// Reason label for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceError::Unreachable(_) => "unreachable",
            SourceError::PathNotFound { .. } => "path_not_found",
            SourceError::Malformed(_) => "malformed",
            SourceError::Credential(_) => "credential",
        }
    }
}

/// Anything that can turn a [`SourceReference`] into a [`Configuration`]
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    async fn resolve(
        &self,
        reference: &SourceReference,
        credential: Option<&Credential>,
    ) -> Result<Configuration, SourceError>;
}

/// Fetch with a transport, open the path, parse the document
#[derive(Clone)]
pub struct Resolver {
    transport: Arc<dyn SourceTransport>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(transport: Arc<dyn SourceTransport>) -> Self {
        Self { transport }
    }

    async fn resolve_inner(
        &self,
        reference: &SourceReference,
        credential: Option<&Credential>,
    ) -> Result<Configuration, SourceError> {
        let not_found = || SourceError::PathNotFound {
            repository: reference.repository.clone(),
            path: reference.path.clone(),
        };
        // No path can ever match, so skip the fetch
        if reference.path.trim().is_empty() {
            return Err(not_found());
        }
        let tree = self.transport.fetch(&reference.repository, credential).await?;
        let bytes = tree.open(&reference.path).ok_or_else(not_found)?;
        Ok(Configuration::from_slice(bytes)?)
    }
}

#[async_trait]
impl ConfigurationSource for Resolver {
    async fn resolve(
        &self,
        reference: &SourceReference,
        credential: Option<&Credential>,
    ) -> Result<Configuration, SourceError> {
        let span = info_span!(
            "source.resolve",
            repository = %reference.repository,
            path = %reference.path,
            authenticated = credential.is_some()
        );
        let start = Instant::now();
        metrics::increment_source_fetch_total();

        let result = self.resolve_inner(reference, credential).instrument(span).await;

        metrics::observe_source_fetch_duration(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::increment_source_fetch_errors(e.as_str());
        }
        result
    }
}
