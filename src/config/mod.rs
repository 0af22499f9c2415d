//! # Configuration
//!
//! Process configuration loaded from environment variables.
//!
//! All settings have sensible defaults and can be overridden via environment
//! variables, which the deployment manifests populate from a ConfigMap with
//! `envFrom`.

mod injector;
mod keys;
mod server;

pub use injector::InjectorConfig;
pub use keys::KeysConfig;
pub use server::ServerConfig;

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read an optional, non-empty environment variable
pub(crate) fn env_var_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
