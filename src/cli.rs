//! # Heimdall CLI
//!
//! Operator tool for encrypting configuration values.
//!
//! ## Usage
//!
//! ```bash
//! # Encrypt DB_PASSWORD in place, using the public key of the document's namespace
//! heimdall inject --config ns1/app.yaml --variable DB_PASSWORD --data 's3cr3t'
//!
//! # Print the public key of a namespace
//! heimdall public-key --namespace ns1
//! ```
//!
//! The document entity must already exist with `encrypted: true`; the CLI
//! only ever replaces its value.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use heimdall::codec;
use heimdall::constants::{DEFAULT_KEYS_ADDRESS, DEFAULT_KEYS_CONNECT_TIMEOUT_SECS};
use heimdall::keys::{GrpcKeyStore, KeyStore};
use heimdall::model::Configuration;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Heimdall configuration CLI
#[derive(Parser)]
#[command(name = "heimdall")]
#[command(about = "Encrypt values of Heimdall configuration documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Address of the key service (`host:port`)
    #[arg(long, global = true, env = "HEIMDALL_KEYS_ADDRESS", default_value = DEFAULT_KEYS_ADDRESS)]
    keys_address: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a value and write it into a configuration document
    Inject {
        /// Configuration document to update in place
        #[arg(short, long)]
        config: PathBuf,

        /// Name of the (encrypted) entity to set
        #[arg(short, long)]
        variable: String,

        /// Plaintext value
        #[arg(short, long)]
        data: String,
    },
    /// Print the public key of a namespace
    PublicKey {
        /// Namespace whose key to print (created on first request)
        #[arg(short, long)]
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "heimdall=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let key_store = GrpcKeyStore::connect(
        &cli.keys_address,
        Duration::from_secs(DEFAULT_KEYS_CONNECT_TIMEOUT_SECS),
    )
    .await
    .with_context(|| format!("Failed to reach the key service at '{}'", cli.keys_address))?;

    match cli.command {
        Commands::Inject {
            config,
            variable,
            data,
        } => inject_command(&key_store, &config, &variable, &data).await,
        Commands::PublicKey { namespace } => {
            let public_key = key_store
                .public_key(&namespace)
                .await
                .with_context(|| {
                    format!("Failed to get the public key of namespace '{namespace}'")
                })?;
            print!("{public_key}");
            Ok(())
        }
    }
}

/// Encrypt `plaintext` into the entity `variable` of `document`
///
/// The entity must exist and be marked encrypted.
async fn seal_entity(
    document: &mut Configuration,
    variable: &str,
    plaintext: &str,
    key_store: &dyn KeyStore,
) -> Result<()> {
    let namespace = document.metadata.namespace.clone();
    let Some(entity) = document.entity_mut(variable) else {
        bail!("Entity '{variable}' does not exist in the configuration");
    };
    if !entity.encrypted {
        bail!("Entity '{variable}' is not marked encrypted; set `encrypted: true` first");
    }

    let public_key = key_store
        .public_key(&namespace)
        .await
        .with_context(|| format!("Failed to get the public key of namespace '{namespace}'"))?;
    entity.value = codec::encrypt(&public_key, plaintext)
        .with_context(|| format!("Failed to encrypt the value of '{variable}'"))?;
    debug!(namespace = %namespace, entity = variable, "Encrypted value");
    Ok(())
}

async fn inject_command(
    key_store: &dyn KeyStore,
    path: &Path,
    variable: &str,
    plaintext: &str,
) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    let mut document = Configuration::from_slice(&bytes)
        .with_context(|| format!("'{}' is not a valid configuration document", path.display()))?;

    seal_entity(&mut document, variable, plaintext, key_store).await?;

    let yaml = document.to_yaml()?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write '{}'", path.display()))?;

    println!("✅ Encrypted '{}' in {}", variable, path.display());
    Ok(())
}
