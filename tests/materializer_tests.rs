//! Materializer tests against the in-memory cluster
//!
//! Covers versioned resource names, in-place updates of the same version,
//! and that a failing entity leaves nothing written.

mod common;

use common::{document, FakeCluster, PAIR};
use heimdall::codec;
use heimdall::keys::KeyManager;
use heimdall::materializer::{MaterializeError, Materializer};
use heimdall::model::Configuration;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn materializer(cluster: &Arc<FakeCluster>) -> Materializer {
    let keys = KeyManager::new(Arc::clone(cluster) as _, 2048);
    Materializer::new(Arc::new(keys), Arc::clone(cluster) as _)
}

fn parse(yaml: &str) -> Configuration {
    Configuration::from_slice(yaml.as_bytes()).unwrap()
}

#[tokio::test]
async fn test_materializes_decrypted_values() {
    let cluster = Arc::new(FakeCluster::with_key_pair("ns1"));
    let configuration = parse(&document("ns1", "v1", "info", "hunter2"));

    let resource = materializer(&cluster)
        .materialize(&configuration)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(resource.namespace, "ns1");
    assert_eq!(resource.name, "heimdall-app-v1");

    let config_map = cluster.config_map("ns1", "heimdall-app-v1").unwrap();
    let data = config_map.data.unwrap();
    assert_eq!(data["LOG_LEVEL"], "info");
    assert_eq!(data["DB_PASSWORD"], "hunter2");
    assert_eq!(
        config_map.metadata.labels.unwrap()["app.kubernetes.io/managed-by"],
        "heimdall"
    );
}

#[tokio::test]
async fn test_new_version_gets_new_resource() {
    let cluster = Arc::new(FakeCluster::with_key_pair("ns1"));
    let materializer = materializer(&cluster);

    materializer
        .materialize(&parse(&document("ns1", "v1", "info", "a")))
        .await
        .unwrap();
    materializer
        .materialize(&parse(&document("ns1", "v2", "debug", "b")))
        .await
        .unwrap();

    let v1 = cluster.config_map("ns1", "heimdall-app-v1").unwrap().data.unwrap();
    let v2 = cluster.config_map("ns1", "heimdall-app-v2").unwrap().data.unwrap();
    assert_eq!(v1["LOG_LEVEL"], "info");
    assert_eq!(v2["LOG_LEVEL"], "debug");
    assert_eq!(v2["DB_PASSWORD"], "b");
}

#[tokio::test]
async fn test_same_version_updates_in_place() {
    let cluster = Arc::new(FakeCluster::with_key_pair("ns1"));
    let materializer = materializer(&cluster);

    materializer
        .materialize(&parse(&document("ns1", "v1", "info", "a")))
        .await
        .unwrap();
    materializer
        .materialize(&parse(&document("ns1", "v1", "warn", "a")))
        .await
        .unwrap();

    assert_eq!(cluster.config_maps.lock().unwrap().len(), 1);
    let data = cluster.config_map("ns1", "heimdall-app-v1").unwrap().data.unwrap();
    assert_eq!(data["LOG_LEVEL"], "warn");
    assert_eq!(cluster.config_map_writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_identical_content_is_not_rewritten() {
    let cluster = Arc::new(FakeCluster::with_key_pair("ns1"));
    let materializer = materializer(&cluster);
    let configuration = parse(&document("ns1", "v1", "info", "a"));

    materializer.materialize(&configuration).await.unwrap();
    materializer.materialize(&configuration).await.unwrap();

    assert_eq!(cluster.config_map_writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_undecryptable_entity_writes_nothing() {
    let cluster = Arc::new(FakeCluster::with_key_pair("ns1"));
    let yaml = format!(
        "{}  - name: BROKEN
    value: bm90IGEgY2lwaGVydGV4dA==
    encrypted: true
",
        document("ns1", "v1", "info", "a")
    );

    let err = materializer(&cluster)
        .materialize(&parse(&yaml))
        .await
        .unwrap_err();

    assert!(matches!(err, MaterializeError::Decrypt { ref entity } if entity == "BROKEN"));
    assert!(cluster.config_maps.lock().unwrap().is_empty());
    assert_eq!(cluster.config_map_writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_key_pair_is_key_not_found() {
    let cluster = Arc::new(FakeCluster::new());
    let err = materializer(&cluster)
        .materialize(&parse(&document("ns1", "v1", "info", "a")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MaterializeError::KeyStore(heimdall::keys::KeyStoreError::KeyNotFound(_))
    ));
    assert!(cluster.secrets.lock().unwrap().is_empty(), "private key lookups never create");
}

#[tokio::test]
async fn test_plain_configuration_needs_no_key() {
    let cluster = Arc::new(FakeCluster::new());
    let configuration = parse(
        "configVersion: v3
metadata:
  name: app
  namespace: ns2
configuration:
  - name: FEATURE_X
    value: 'on'
",
    );

    let resource = materializer(&cluster).materialize(&configuration).await.unwrap();

    assert_eq!(resource.unwrap().name, "heimdall-app-v3");
    assert!(cluster.secrets.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_configuration_publishes_nothing() {
    let cluster = Arc::new(FakeCluster::new());
    let configuration = parse(
        "configVersion: v1
metadata:
  name: app
  namespace: ns1
configuration: []
",
    );

    let resource = materializer(&cluster).materialize(&configuration).await.unwrap();

    assert!(resource.is_none());
    assert!(cluster.config_maps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_write_outage_surfaces_cluster_error() {
    let cluster = Arc::new(FakeCluster::with_key_pair("ns1"));
    cluster.fail_config_map_writes.store(true, Ordering::SeqCst);

    let err = materializer(&cluster)
        .materialize(&parse(&document("ns1", "v1", "info", "a")))
        .await
        .unwrap_err();

    assert!(matches!(err, MaterializeError::Cluster(_)));
}

#[test]
fn test_ciphertext_is_randomized() {
    let a = codec::encrypt(&PAIR.public_key, "same").unwrap();
    let b = codec::encrypt(&PAIR.public_key, "same").unwrap();
    assert_ne!(a, b);
}
