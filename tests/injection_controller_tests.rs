//! Injection controller tests
//!
//! Runs the informer, event handler, applier and cleanup loop end to end
//! against the in-memory cluster and repository. Watch events are fed by
//! hand, and so are the deployment updates the controller itself wrote.

mod common;

use common::{document, pending_deployment, FakeCluster, FakeTransport, REPOSITORY};
use futures::channel::mpsc;
use heimdall::cluster::ObjectKey;
use heimdall::controller::{
    reconcile, EventHandler, FibonacciBackoff, Informer, InjectionError, Injector, Reconciler,
};
use heimdall::keys::KeyManager;
use heimdall::materializer::Materializer;
use heimdall::runtime::run_controller;
use heimdall::source::{CredentialHosts, Resolver, SecretRef, SourceError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube_runtime::watcher::Event;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(100);

struct Harness {
    cluster: Arc<FakeCluster>,
    transport: Arc<FakeTransport>,
    reconciler: Arc<Reconciler>,
    events: mpsc::UnboundedSender<Event<Deployment>>,
    controller: JoinHandle<()>,
}

impl Harness {
    fn new(transport: FakeTransport, cleanup: bool) -> Self {
        Self::with_credentials(transport, cleanup, None, "")
    }

    fn with_credentials(
        transport: FakeTransport,
        cleanup: bool,
        credentials: Option<SecretRef>,
        hosts: &str,
    ) -> Self {
        let cluster = Arc::new(FakeCluster::with_key_pair("ns1"));
        let transport = Arc::new(transport);

        let keys = KeyManager::new(Arc::clone(&cluster) as _, 2048);
        let materializer = Materializer::new(Arc::new(keys), Arc::clone(&cluster) as _);
        let injector = Injector::new(
            Arc::new(Resolver::new(Arc::clone(&transport) as _)),
            materializer,
            Arc::clone(&cluster) as _,
            Arc::clone(&cluster) as _,
            Arc::clone(&cluster) as _,
        )
        .with_credentials(credentials, CredentialHosts::parse(hosts));

        let reconciler = Arc::new(Reconciler::new(
            injector,
            FibonacciBackoff::new(Duration::from_millis(1), Duration::from_millis(5)),
        ));

        let (events, rx) = mpsc::unbounded();
        let controller = tokio::spawn(run_controller(
            rx,
            Informer::new(),
            EventHandler::new(cleanup),
            Arc::clone(&reconciler),
            2,
        ));

        let harness = Self {
            cluster,
            transport,
            reconciler,
            events,
            controller,
        };
        harness.list(Vec::new());
        harness
    }

    fn watch(&self, event: Event<Deployment>) {
        self.events.unbounded_send(event).expect("controller is running");
    }

    /// Deliver a complete (re)list
    fn list(&self, deployments: Vec<Deployment>) {
        self.watch(Event::Init);
        for deployment in deployments {
            self.watch(Event::InitApply(deployment));
        }
        self.watch(Event::InitDone);
    }

    /// Echo the deployment the controller wrote back through the watch
    async fn echo_deployment_write(&self) -> Deployment {
        eventually("deployment write", || self.cluster.deployment("ns1", "web").is_some()).await;
        let mut written = self.cluster.deployment("ns1", "web").expect("deployment was written");
        written.metadata.resource_version = Some("2".into());
        self.watch(Event::Apply(written.clone()));
        written
    }

    fn injected_config_map(&self, name: &str) -> bool {
        self.cluster.config_map("ns1", name).is_some()
    }
}

/// Poll `condition` until it holds
async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn transport_with_document(version: &str) -> FakeTransport {
    FakeTransport::with_file(
        REPOSITORY,
        "ns1/app.yaml",
        &document("ns1", version, "info", "hunter2"),
    )
}

fn git_auth_secret() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("git-auth".into()),
            namespace: Some("ns1".into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            ("username".to_owned(), ByteString(b"deploy-bot".to_vec())),
            ("password".to_owned(), ByteString(b"token".to_vec())),
        ])),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_injects_pending_deployment() {
    let harness = Harness::new(transport_with_document("v1"), false);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    eventually("injection", || harness.cluster.deployment("ns1", "web").is_some()).await;

    let config_map = harness.cluster.config_map("ns1", "heimdall-app-v1").unwrap();
    let data = config_map.data.unwrap();
    assert_eq!(data["LOG_LEVEL"], "info");
    assert_eq!(data["DB_PASSWORD"], "hunter2");

    let deployment = harness.cluster.deployment("ns1", "web").unwrap();
    let annotations = deployment.metadata.annotations.unwrap();
    assert_eq!(annotations["heimdall-injected"], "true");
    assert_eq!(annotations["heimdall-name"], "app");
    assert_eq!(annotations["heimdall-config-version"], "v1");

    let containers = deployment.spec.unwrap().template.spec.unwrap().containers;
    assert_eq!(containers.len(), 2);
    for container in containers {
        let env_from = container.env_from.unwrap();
        assert_eq!(env_from.len(), 1);
        assert_eq!(env_from[0].config_map_ref.as_ref().unwrap().name, "heimdall-app-v1");
    }
}

#[tokio::test]
async fn test_injected_deployment_is_not_processed_again() {
    let harness = Harness::new(transport_with_document("v1"), false);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    let injected = harness.echo_deployment_write().await;
    tokio::time::sleep(SETTLE).await;
    let writes = harness.cluster.writes();
    let fetches = harness.transport.fetches();

    let mut scaled = injected;
    scaled.metadata.resource_version = Some("3".into());
    scaled
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert("scaled".into(), "yes".into());
    harness.watch(Event::Apply(scaled));
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.cluster.writes(), writes);
    assert_eq!(harness.transport.fetches(), fetches);
    assert_eq!(fetches, 1);
}

#[tokio::test]
async fn test_unannotated_deployment_is_ignored() {
    let harness = Harness::new(transport_with_document("v1"), false);

    harness.watch(Event::Apply(common::deployment("ns1", &[("team", "payments")])));
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.transport.fetches(), 0);
    assert_eq!(harness.cluster.writes(), 0);
}

#[tokio::test]
async fn test_repository_without_path_fails_as_path_not_found() {
    let harness = Harness::new(transport_with_document("v1"), false);
    let deployment = common::deployment("ns1", &[("heimdall-repository", REPOSITORY)]);

    let err = reconcile(Arc::new(deployment.clone()), Arc::clone(&harness.reconciler))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InjectionError::Source(SourceError::PathNotFound { .. })
    ));
    assert!(!err.class().is_retryable());

    harness.watch(Event::Apply(deployment));
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.transport.fetches(), 0);
    assert_eq!(harness.cluster.writes(), 0);
    assert!(harness.cluster.deployment("ns1", "web").is_none());
}

#[tokio::test]
async fn test_removing_marker_triggers_fresh_injection() {
    let harness = Harness::new(transport_with_document("v1"), false);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    let mut injected = harness.echo_deployment_write().await;
    tokio::time::sleep(SETTLE).await;

    harness.transport.put(
        REPOSITORY,
        "ns1/app.yaml",
        &document("ns1", "v2", "debug", "hunter3"),
    );
    injected.metadata.resource_version = Some("3".into());
    if let Some(annotations) = injected.metadata.annotations.as_mut() {
        annotations.remove("heimdall-injected");
    }
    harness.watch(Event::Apply(injected));
    eventually("re-injection", || harness.injected_config_map("heimdall-app-v2")).await;

    let v2 = harness.cluster.config_map("ns1", "heimdall-app-v2").unwrap().data.unwrap();
    assert_eq!(v2["DB_PASSWORD"], "hunter3");
    eventually("deployment update", || {
        harness
            .cluster
            .deployment("ns1", "web")
            .and_then(|d| d.metadata.annotations)
            .is_some_and(|a| a.get("heimdall-config-version").map(String::as_str) == Some("v2"))
    })
    .await;
}

#[tokio::test]
async fn test_marker_toggle_retries_data_format_failure() {
    let transport = FakeTransport::with_file(REPOSITORY, "ns1/app.yaml", "configVersion: [broken");
    let harness = Harness::new(transport, false);

    let mut pending = pending_deployment("ns1", "ns1/app.yaml");
    harness.watch(Event::Apply(pending.clone()));
    eventually("first attempt", || harness.transport.fetches() == 1).await;

    harness.transport.put(
        REPOSITORY,
        "ns1/app.yaml",
        &document("ns1", "v1", "info", "hunter2"),
    );
    for (version, marker) in [("2", Some("true")), ("3", None)] {
        pending.metadata.resource_version = Some(version.into());
        let annotations = pending.metadata.annotations.get_or_insert_with(BTreeMap::new);
        match marker {
            Some(value) => annotations.insert("heimdall-injected".into(), value.into()),
            None => annotations.remove("heimdall-injected"),
        };
        harness.watch(Event::Apply(pending.clone()));
    }

    eventually("injection after fix", || harness.injected_config_map("heimdall-app-v1")).await;
}

#[tokio::test]
async fn test_transient_failure_is_retried_three_times() {
    let transport = transport_with_document("v1");
    transport.unreachable.store(true, Ordering::SeqCst);
    let harness = Harness::new(transport, false);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    eventually("four attempts", || harness.transport.fetches() == 4).await;

    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.transport.fetches(), 4, "dropped after the last retry");
    assert!(harness.cluster.deployment("ns1", "web").is_none());
}

#[tokio::test]
async fn test_recovers_when_transient_failure_clears() {
    let transport = transport_with_document("v1");
    transport.failing_fetches.store(2, Ordering::SeqCst);
    let harness = Harness::new(transport, false);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));

    eventually("injection", || harness.cluster.deployment("ns1", "web").is_some()).await;
    assert_eq!(harness.transport.fetches(), 3);
    assert!(harness.injected_config_map("heimdall-app-v1"));
}

#[tokio::test]
async fn test_data_format_failure_is_not_retried() {
    let transport =
        FakeTransport::with_file(REPOSITORY, "ns1/app.yaml", "configVersion: [not, a, string");
    let harness = Harness::new(transport, false);

    let mut pending = pending_deployment("ns1", "ns1/app.yaml");
    harness.watch(Event::Apply(pending.clone()));
    eventually("first attempt", || harness.transport.fetches() == 1).await;

    // Spec churn on a failed deployment does not bring it back.
    pending.metadata.resource_version = Some("2".into());
    pending
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert("rollout".into(), "2".into());
    harness.watch(Event::Apply(pending));
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.transport.fetches(), 1);
}

#[tokio::test]
async fn test_missing_path_is_not_retried() {
    let harness = Harness::new(transport_with_document("v1"), false);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/missing.yaml")));
    eventually("first attempt", || harness.transport.fetches() == 1).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.transport.fetches(), 1);
    assert!(harness.cluster.config_maps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_namespace_mismatch_is_rejected() {
    let transport = FakeTransport::with_file(
        REPOSITORY,
        "ns2/app.yaml",
        &document("ns2", "v1", "info", "other-namespace"),
    );
    let harness = Harness::new(transport, false);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns2/app.yaml")));
    eventually("first attempt", || harness.transport.fetches() == 1).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.transport.fetches(), 1);
    assert!(harness.cluster.config_maps.lock().unwrap().is_empty());
    assert!(harness.cluster.deployment("ns1", "web").is_none());
}

#[tokio::test]
async fn test_deployment_conflict_is_retried() {
    let harness = Harness::new(transport_with_document("v1"), false);
    harness.cluster.deployment_conflicts.store(1, Ordering::SeqCst);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));

    eventually("retried injection", || harness.cluster.deployment("ns1", "web").is_some()).await;
    assert_eq!(harness.transport.fetches(), 2);
    let deployment = harness.cluster.deployment("ns1", "web").unwrap();
    assert_eq!(deployment.metadata.annotations.unwrap()["heimdall-injected"], "true");
    assert_eq!(harness.cluster.config_maps.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_deleted_deployment_cleans_up_config_map() {
    let harness = Harness::new(transport_with_document("v1"), true);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    let injected = harness.echo_deployment_write().await;
    assert!(harness.injected_config_map("heimdall-app-v1"));

    harness.watch(Event::Delete(injected));
    eventually("cleanup", || !harness.injected_config_map("heimdall-app-v1")).await;
    assert_eq!(harness.cluster.config_map_deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cleanup_of_missing_config_map_succeeds() {
    let harness = Harness::new(transport_with_document("v1"), true);

    tokio::time::timeout(
        WAIT,
        harness.reconciler.cleanup(ObjectKey::new("ns1", "heimdall-gone-v9")),
    )
    .await
    .expect("cleanup returns");
    assert_eq!(harness.cluster.config_map_deletes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cleanup_disabled_keeps_config_map() {
    let harness = Harness::new(transport_with_document("v1"), false);

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    let injected = harness.echo_deployment_write().await;

    harness.watch(Event::Delete(injected));
    tokio::time::sleep(SETTLE).await;

    assert!(harness.injected_config_map("heimdall-app-v1"));
    assert_eq!(harness.cluster.config_map_deletes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_relist_picks_up_deployments_created_while_down() {
    let harness = Harness::new(transport_with_document("v1"), false);

    harness.watch(Event::Init);
    harness.watch(Event::InitApply(pending_deployment("ns1", "ns1/app.yaml")));
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.transport.fetches(), 0, "nothing runs before the list completes");

    harness.watch(Event::InitDone);
    eventually("injection", || harness.injected_config_map("heimdall-app-v1")).await;
}

#[tokio::test]
async fn test_controller_stops_when_watch_ends() {
    let harness = Harness::new(transport_with_document("v1"), false);
    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    eventually("injection", || harness.injected_config_map("heimdall-app-v1")).await;

    let Harness {
        events, controller, ..
    } = harness;
    drop(events);
    tokio::time::timeout(WAIT, controller)
        .await
        .expect("controller stops")
        .expect("controller task did not panic");
}

#[tokio::test]
async fn test_fetch_uses_configured_credentials() {
    let harness = Harness::with_credentials(
        transport_with_document("v1"),
        false,
        Some(SecretRef::parse("ns1/git-auth").unwrap()),
        "git.example.com",
    );
    harness
        .cluster
        .secrets
        .lock()
        .unwrap()
        .insert(("ns1".into(), "git-auth".into()), git_auth_secret());

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    eventually("injection", || harness.injected_config_map("heimdall-app-v1")).await;

    assert_eq!(
        harness.transport.last_credential.lock().unwrap().as_deref(),
        Some("deploy-bot")
    );
}

#[tokio::test]
async fn test_credentials_withheld_from_unlisted_host() {
    let harness = Harness::with_credentials(
        transport_with_document("v1"),
        false,
        Some(SecretRef::parse("ns1/git-auth").unwrap()),
        "github.com",
    );
    harness
        .cluster
        .secrets
        .lock()
        .unwrap()
        .insert(("ns1".into(), "git-auth".into()), git_auth_secret());

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    eventually("injection", || harness.injected_config_map("heimdall-app-v1")).await;

    assert_eq!(harness.transport.fetches(), 1);
    assert_eq!(harness.transport.last_credential.lock().unwrap().as_deref(), None);
}

#[tokio::test]
async fn test_reference_scenario_db_host_and_password() {
    let cluster_keys = Arc::new(FakeCluster::new());
    let public_key = heimdall::keys::KeyStore::public_key(
        &KeyManager::new(Arc::clone(&cluster_keys) as _, 2048),
        "ns1",
    )
    .await
    .unwrap();
    let ciphertext = heimdall::codec::encrypt(&public_key, "s3cr3t-pass").unwrap();
    let yaml = format!(
        "configVersion: \"v1\"
metadata:
  name: app
  namespace: ns1
configuration:
  - name: DB_HOST
    value: db.ns1
    encrypted: false
  - name: DB_PASS
    value: {ciphertext}
    encrypted: true
"
    );

    let harness = Harness::new(FakeTransport::with_file(REPOSITORY, "ns1/app.yaml", &yaml), false);
    // Swap in the freshly requested key pair so the harness decrypts with it.
    let stored = cluster_keys.secrets.lock().unwrap().clone();
    *harness.cluster.secrets.lock().unwrap() = stored;

    harness.watch(Event::Apply(pending_deployment("ns1", "ns1/app.yaml")));
    eventually("injection", || harness.cluster.deployment("ns1", "web").is_some()).await;

    let data = harness.cluster.config_map("ns1", "heimdall-app-v1").unwrap().data.unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data["DB_HOST"], "db.ns1");
    assert_eq!(data["DB_PASS"], "s3cr3t-pass");

    let annotations = harness
        .cluster
        .deployment("ns1", "web")
        .unwrap()
        .metadata
        .annotations
        .unwrap();
    assert_eq!(annotations["heimdall-injected"], "true");
    assert_eq!(annotations["heimdall-name"], "app");
    assert_eq!(annotations["heimdall-config-version"], "v1");
}
