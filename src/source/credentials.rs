//! Repository credentials.

use super::SourceError;
use crate::cluster::SecretApi;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::Zeroizing;

/// Secret data key holding the repository user name
pub const USERNAME_FIELD: &str = "username";

/// Secret data key holding the repository password or token
pub const PASSWORD_FIELD: &str = "password";

/// Reference to the secret holding repository credentials, `namespace/name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

impl SecretRef {
    /// Parse `namespace/name`
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Credential`] unless the value has exactly two
    /// valid, non-empty parts.
    pub fn parse(value: &str) -> Result<Self, SourceError> {
        let (namespace, name) = value.trim().split_once('/').ok_or_else(|| {
            SourceError::Credential(format!("'{value}' is not of the form namespace/name"))
        })?;
        if !crate::validation::is_dns1123_label(namespace)
            || !crate::validation::is_dns1123_subdomain(name)
            || name.contains('/')
        {
            return Err(SourceError::Credential(format!(
                "'{value}' is not of the form namespace/name"
            )));
        }
        Ok(Self {
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        })
    }
}

impl std::fmt::Display for SecretRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Hosts repository credentials may be sent to
///
/// Credentials only ever accompany `https` fetches of a listed host. Host
/// names compare case-insensitively; ports are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialHosts {
    hosts: Vec<String>,
}

impl CredentialHosts {
    /// Parse a comma separated list such as `github.com, git.example.com`
    pub fn parse(value: &str) -> Self {
        let hosts = value
            .split(',')
            .map(|host| host.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Whether a credential may be sent along with a fetch of `repository`
    pub fn permits(&self, repository: &str) -> bool {
        let Ok(url) = reqwest::Url::parse(repository.trim()) else {
            return false;
        };
        if url.scheme() != "https" {
            return false;
        }
        url.host_str().is_some_and(|host| {
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            self.hosts.iter().any(|allowed| *allowed == host)
        })
    }
}

impl std::fmt::Display for CredentialHosts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hosts.join(","))
    }
}

/// HTTP basic credentials for a repository fetch
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password: Zeroizing<String>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Value of an HTTP `Authorization` header
    pub fn basic_authorization(&self) -> Zeroizing<String> {
        let raw = Zeroizing::new(format!("{}:{}", self.username, self.password.as_str()));
        Zeroizing::new(format!("Basic {}", STANDARD.encode(raw.as_bytes())))
    }

    /// Read `username` / `password` from the referenced secret
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Credential`] if the secret is missing,
    /// incomplete or unreadable.
    pub async fn load(secrets: &dyn SecretApi, reference: &SecretRef) -> Result<Self, SourceError> {
        let secret = secrets
            .get(&reference.namespace, &reference.name)
            .await
            .map_err(|e| {
                SourceError::Credential(format!("failed to read secret {reference}: {e}"))
            })?
            .ok_or_else(|| SourceError::Credential(format!("secret {reference} not found")))?;

        let field = |key: &str| -> Result<String, SourceError> {
            let bytes = secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .ok_or_else(|| {
                    SourceError::Credential(format!("secret {reference} has no '{key}'"))
                })?;
            String::from_utf8(bytes.0.clone()).map_err(|_| {
                SourceError::Credential(format!("secret {reference} '{key}' is not UTF-8"))
            })
        };

        let username = field(USERNAME_FIELD)?;
        let password = Zeroizing::new(field(PASSWORD_FIELD)?);
        Ok(Self { username, password })
    }
}
