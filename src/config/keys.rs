//! # Key Service Configuration

use super::{env_var_opt, env_var_or_default};
use anyhow::{Context, Result};
use std::net::SocketAddr;

/// Settings of the key service
#[derive(Debug, Clone)]
pub struct KeysConfig {
    /// gRPC listen address
    pub listen_address: SocketAddr,
    /// Modulus size of newly generated key pairs
    pub key_bits: usize,
}

impl KeysConfig {
    /// Load configuration from environment variables with defaults
    ///
    /// # Errors
    ///
    /// Fails if `HEIMDALL_KEYS_LISTEN` is not a socket address or
    /// `HEIMDALL_KEY_BITS` is below the supported minimum.
    pub fn from_env() -> Result<Self> {
        use crate::constants::*;

        let listen = env_var_opt("HEIMDALL_KEYS_LISTEN")
            .unwrap_or_else(|| DEFAULT_KEYS_LISTEN_ADDRESS.to_owned());
        let listen_address = listen
            .parse()
            .with_context(|| format!("Invalid HEIMDALL_KEYS_LISTEN '{listen}'"))?;

        let key_bits = env_var_or_default("HEIMDALL_KEY_BITS", DEFAULT_KEY_BITS);
        if key_bits < crate::codec::MIN_KEY_BITS {
            anyhow::bail!(
                "HEIMDALL_KEY_BITS={key_bits} is below the minimum of {}",
                crate::codec::MIN_KEY_BITS
            );
        }

        Ok(Self {
            listen_address,
            key_bits,
        })
    }
}
