//! # Injector Configuration

use super::{env_var_opt, env_var_or_default};
use crate::source::{CredentialHosts, SecretRef};
use anyhow::{Context, Result};
use std::time::Duration;

/// Settings of the injection controller
#[derive(Debug, Clone)]
pub struct InjectorConfig {
    /// Address of the key service (`host:port`, scheme optional)
    pub keys_address: String,
    /// Secret holding `username` / `password` for repository fetches
    pub git_credentials: Option<SecretRef>,
    /// Repository hosts `git_credentials` may be sent to
    pub git_credential_hosts: CredentialHosts,
    /// Delete the materialized config map when an injected deployment is deleted
    pub configmap_cleanup: bool,
    /// Number of deployments reconciled concurrently
    pub workers: usize,
    /// Lower bound of the requeue backoff
    pub retry_min: Duration,
    /// Upper bound of the requeue backoff
    pub retry_max: Duration,
    /// Timeout of one repository fetch
    pub git_timeout: Duration,
    /// Timeout of establishing a key service connection
    pub keys_connect_timeout: Duration,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            keys_address: DEFAULT_KEYS_ADDRESS.to_owned(),
            git_credentials: None,
            git_credential_hosts: CredentialHosts::default(),
            configmap_cleanup: false,
            workers: DEFAULT_WORKERS,
            retry_min: Duration::from_millis(DEFAULT_RETRY_MIN_MS),
            retry_max: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            git_timeout: Duration::from_secs(DEFAULT_GIT_TIMEOUT_SECS),
            keys_connect_timeout: Duration::from_secs(DEFAULT_KEYS_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Repository credentials and the hosts they may be sent to
fn credential_settings(
    credentials: Option<&str>,
    hosts: Option<&str>,
) -> Result<(Option<SecretRef>, CredentialHosts)> {
    let credentials = credentials
        .map(SecretRef::parse)
        .transpose()
        .context("Invalid HEIMDALL_GIT_CREDENTIALS")?;
    let hosts = hosts.map(CredentialHosts::parse).unwrap_or_default();
    if credentials.is_some() && hosts.is_empty() {
        anyhow::bail!(
            "HEIMDALL_GIT_CREDENTIALS requires HEIMDALL_GIT_CREDENTIAL_HOSTS, \
             the comma separated hosts the credentials may be sent to"
        );
    }
    Ok((credentials, hosts))
}

impl InjectorConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// # Errors
    ///
    /// Fails if `HEIMDALL_GIT_CREDENTIALS` is set but is not `namespace/name`,
    /// or is set without `HEIMDALL_GIT_CREDENTIAL_HOSTS`.
    pub fn from_env() -> Result<Self> {
        use crate::constants::*;

        let (git_credentials, git_credential_hosts) = credential_settings(
            env_var_opt("HEIMDALL_GIT_CREDENTIALS").as_deref(),
            env_var_opt("HEIMDALL_GIT_CREDENTIAL_HOSTS").as_deref(),
        )?;

        let retry_min_ms = env_var_or_default("HEIMDALL_RETRY_MIN_MS", DEFAULT_RETRY_MIN_MS);
        let retry_max_ms =
            env_var_or_default("HEIMDALL_RETRY_MAX_MS", DEFAULT_RETRY_MAX_MS).max(retry_min_ms);

        Ok(Self {
            keys_address: env_var_opt("HEIMDALL_KEYS_ADDRESS")
                .unwrap_or_else(|| DEFAULT_KEYS_ADDRESS.to_owned()),
            git_credentials,
            git_credential_hosts,
            configmap_cleanup: env_var_or_default("HEIMDALL_CONFIGMAP_CLEANUP", false),
            workers: env_var_or_default("HEIMDALL_WORKERS", DEFAULT_WORKERS).max(1),
            retry_min: Duration::from_millis(retry_min_ms),
            retry_max: Duration::from_millis(retry_max_ms),
            git_timeout: Duration::from_secs(env_var_or_default(
                "HEIMDALL_GIT_TIMEOUT_SECS",
                DEFAULT_GIT_TIMEOUT_SECS,
            )),
            keys_connect_timeout: Duration::from_secs(env_var_or_default(
                "HEIMDALL_KEYS_CONNECT_TIMEOUT_SECS",
                DEFAULT_KEYS_CONNECT_TIMEOUT_SECS,
            )),
        })
    }
}
