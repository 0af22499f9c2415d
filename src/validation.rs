//! # Validation
//!
//! Name rules shared by the key service, the resolver and the CLI.

use regex::Regex;
use std::sync::LazyLock;

static DNS1123_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
        .expect("Failed to compile DNS1123_LABEL regex - this should never happen")
});

static DNS1123_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("Failed to compile DNS1123_SUBDOMAIN regex - this should never happen")
});

static CONFIG_MAP_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-._a-zA-Z0-9]+$")
        .expect("Failed to compile CONFIG_MAP_KEY regex - this should never happen")
});

/// Namespace names: DNS-1123 label, at most 63 characters
pub fn is_dns1123_label(value: &str) -> bool {
    value.len() <= 63 && DNS1123_LABEL.is_match(value)
}

/// Object names such as config maps: DNS-1123 subdomain, at most 253 characters
pub fn is_dns1123_subdomain(value: &str) -> bool {
    value.len() <= 253 && DNS1123_SUBDOMAIN.is_match(value)
}

/// Keys of a config map's `data`
pub fn is_config_map_key(value: &str) -> bool {
    value.len() <= 253 && value != "." && value != ".." && CONFIG_MAP_KEY.is_match(value)
}
