//! gRPC client for the key service.

use super::proto::heimdall_keys_client::HeimdallKeysClient;
use super::proto::Namespace;
use super::{KeyStore, KeyStoreError};
use async_trait::async_trait;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use zeroize::Zeroizing;

/// [`KeyStore`] reached over gRPC
#[derive(Debug, Clone)]
pub struct GrpcKeyStore {
    client: HeimdallKeysClient<Channel>,
}

fn endpoint(address: &str, connect_timeout: Duration) -> Result<Endpoint, KeyStoreError> {
    let uri = if address.contains("://") {
        address.to_owned()
    } else {
        format!("http://{address}")
    };
    Endpoint::from_shared(uri)
        .map(|e| e.connect_timeout(connect_timeout))
        .map_err(|e| {
            KeyStoreError::Internal(format!("invalid key service address '{address}': {e}"))
        })
}

impl GrpcKeyStore {
    /// Build a client that connects on first use
    ///
    /// `address` is `host:port` or a full `http://` URI.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Internal`] if the address is not a valid URI.
    pub fn connect_lazy(address: &str, connect_timeout: Duration) -> Result<Self, KeyStoreError> {
        let channel = endpoint(address, connect_timeout)?.connect_lazy();
        Ok(Self {
            client: HeimdallKeysClient::new(channel),
        })
    }

    /// Connect eagerly, failing fast when the service is unreachable
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Unavailable`] if the connection fails.
    pub async fn connect(address: &str, connect_timeout: Duration) -> Result<Self, KeyStoreError> {
        let channel = endpoint(address, connect_timeout)?
            .connect()
            .await
            .map_err(|e| {
                KeyStoreError::Unavailable(format!("cannot reach key service at '{address}': {e}"))
            })?;
        Ok(Self {
            client: HeimdallKeysClient::new(channel),
        })
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: HeimdallKeysClient::new(channel),
        }
    }
}

/// Map a status back onto the typed errors the server started from
fn from_status(namespace: &str, status: &Status) -> KeyStoreError {
    match status.code() {
        Code::NotFound => KeyStoreError::KeyNotFound(namespace.to_owned()),
        Code::InvalidArgument => KeyStoreError::InvalidNamespace(namespace.to_owned()),
        Code::Unavailable
        | Code::DeadlineExceeded
        | Code::Cancelled
        | Code::ResourceExhausted
        | Code::Aborted => KeyStoreError::Unavailable(status.message().to_owned()),
        _ => KeyStoreError::Internal(status.message().to_owned()),
    }
}

#[async_trait]
impl KeyStore for GrpcKeyStore {
    async fn public_key(&self, namespace: &str) -> Result<String, KeyStoreError> {
        let request = Namespace {
            namespace: namespace.to_owned(),
        };
        self.client
            .clone()
            .get_public_key(request)
            .await
            .map(|response| response.into_inner().key)
            .map_err(|status| from_status(namespace, &status))
    }

    async fn private_key(&self, namespace: &str) -> Result<Zeroizing<String>, KeyStoreError> {
        let request = Namespace {
            namespace: namespace.to_owned(),
        };
        self.client
            .clone()
            .get_private_key(request)
            .await
            .map(|response| Zeroizing::new(response.into_inner().key))
            .map_err(|status| from_status(namespace, &status))
    }
}
