//! gRPC server for the key service.

use super::proto::heimdall_keys_server::{HeimdallKeys, HeimdallKeysServer};
use super::proto::{Key, Namespace};
use super::{KeyStore, KeyStoreError};
use crate::observability::metrics;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};

/// `heimdall.keys.v1.HeimdallKeys` backed by a [`KeyStore`]
#[derive(Clone)]
pub struct KeysGrpcService {
    store: Arc<dyn KeyStore>,
}

impl std::fmt::Debug for KeysGrpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysGrpcService").finish_non_exhaustive()
    }
}

impl KeysGrpcService {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self { store }
    }

    /// Convert to a tonic service
    pub fn into_service(self) -> HeimdallKeysServer<Self> {
        HeimdallKeysServer::new(self)
    }
}

fn record(operation: &str, result: &Result<impl Sized, KeyStoreError>) {
    match result {
        Ok(_) => metrics::increment_key_requests(operation, "ok"),
        Err(e) => {
            warn!(operation, error = %e, "Key request failed");
            metrics::increment_key_requests(operation, e.as_str());
        }
    }
}

#[tonic::async_trait]
impl HeimdallKeys for KeysGrpcService {
    #[instrument(skip_all, fields(namespace = %request.get_ref().namespace))]
    async fn get_public_key(&self, request: Request<Namespace>) -> Result<Response<Key>, Status> {
        let namespace = request.into_inner().namespace;
        let result = self.store.public_key(&namespace).await;
        record("get_public_key", &result);
        Ok(Response::new(Key { key: result? }))
    }

    #[instrument(skip_all, fields(namespace = %request.get_ref().namespace))]
    async fn get_private_key(&self, request: Request<Namespace>) -> Result<Response<Key>, Status> {
        let namespace = request.into_inner().namespace;
        let result = self.store.private_key(&namespace).await;
        record("get_private_key", &result);
        let private_key = result?;
        Ok(Response::new(Key {
            key: private_key.as_str().to_owned(),
        }))
    }
}

/// Serve the key service on `addr` until `shutdown` resolves
///
/// # Errors
///
/// Returns the transport error if the listener cannot be bound or fails.
pub async fn serve(
    addr: SocketAddr,
    service: KeysGrpcService,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), tonic::transport::Error> {
    info!(%addr, "Starting key service (gRPC, plaintext)");
    Server::builder()
        .add_service(service.into_service())
        .serve_with_shutdown(addr, shutdown)
        .await?;
    info!("Key service stopped");
    Ok(())
}
