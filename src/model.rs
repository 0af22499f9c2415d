//! # Configuration Document
//!
//! The versioned document committed to a repository and consumed by the
//! injector:
//!
//! ```yaml
//! configVersion: v1
//! metadata:
//!   author: ops
//!   name: app
//!   namespace: ns1
//! configuration:
//!   - name: DB_HOST
//!     value: db.ns1
//!     encrypted: false
//!   - name: DB_PASS
//!     value: <base64 ciphertext>
//!     encrypted: true
//! ```

use crate::constants::RESOURCE_NAME_PREFIX;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// A parsed configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Opaque version token; part of the materialized resource name
    #[serde(rename = "configVersion")]
    pub config_version: String,
    pub metadata: Metadata,
    /// Entities in document order
    #[serde(rename = "configuration", default)]
    pub entities: Vec<ConfigurationEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub author: String,
    pub name: String,
    /// Target namespace; selects the key pair and where the resource lives
    pub namespace: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationEntity {
    pub name: String,
    /// Literal value, or base64 ciphertext when `encrypted`
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub encrypted: bool,
}

impl std::fmt::Debug for ConfigurationEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value: &dyn std::fmt::Debug = if self.encrypted {
            &"<ciphertext>"
        } else {
            &self.value
        };
        f.debug_struct("ConfigurationEntity")
            .field("name", &self.name)
            .field("value", value)
            .field("encrypted", &self.encrypted)
            .finish()
    }
}

/// Why a document was rejected
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("failed to parse configuration document: {0}")]
    Parse(String),
    #[error("invalid configuration document: {0}")]
    Invalid(String),
}

impl Configuration {
    /// Parse and validate a YAML (or JSON) document
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Parse`] for syntax or schema errors and
    /// [`DocumentError::Invalid`] when [`Configuration::validate`] fails.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        let configuration: Self =
            serde_yaml::from_slice(bytes).map_err(|e| DocumentError::Parse(e.to_string()))?;
        configuration.validate()?;
        Ok(configuration)
    }

    /// Serialize back to YAML
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Parse`] if serialization fails.
    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        serde_yaml::to_string(self).map_err(|e| DocumentError::Parse(e.to_string()))
    }

    /// `heimdall-<name>-<version>`
    pub fn resource_name(&self) -> String {
        format!(
            "{RESOURCE_NAME_PREFIX}-{}-{}",
            self.metadata.name, self.config_version
        )
    }

    pub fn entity(&self, name: &str) -> Option<&ConfigurationEntity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn entity_mut(&mut self, name: &str) -> Option<&mut ConfigurationEntity> {
        self.entities.iter_mut().find(|e| e.name == name)
    }

    pub fn has_encrypted_entities(&self) -> bool {
        self.entities.iter().any(|e| e.encrypted)
    }

    /// Check the invariants the injector relies on
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.config_version.trim().is_empty() {
            return Err(DocumentError::Invalid("configVersion must not be empty".into()));
        }
        if self.metadata.name.trim().is_empty() {
            return Err(DocumentError::Invalid("metadata.name must not be empty".into()));
        }
        if !validation::is_dns1123_label(&self.metadata.namespace) {
            return Err(DocumentError::Invalid(format!(
                "metadata.namespace '{}' is not a valid namespace name",
                self.metadata.namespace
            )));
        }

        let resource_name = self.resource_name();
        if !validation::is_dns1123_subdomain(&resource_name) {
            return Err(DocumentError::Invalid(format!(
                "derived resource name '{resource_name}' is not a valid object name; \
                 metadata.name and configVersion must be lowercase alphanumerics, '-' or '.'"
            )));
        }

        let mut seen = HashSet::with_capacity(self.entities.len());
        for entity in &self.entities {
            if !validation::is_config_map_key(&entity.name) {
                return Err(DocumentError::Invalid(format!(
                    "entity name '{}' is not a valid config map key",
                    entity.name
                )));
            }
            if !seen.insert(entity.name.as_str()) {
                return Err(DocumentError::Invalid(format!(
                    "entity '{}' is declared more than once",
                    entity.name
                )));
            }
        }

        Ok(())
    }
}
