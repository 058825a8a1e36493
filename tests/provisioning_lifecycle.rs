//! ---
//! rp_section: "15-testing-qa-runbook"
//! rp_subsection: "integration-tests"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Cross-crate provisioning lifecycle: store, lease queue, pipelines and workers."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rp_backend::{Backend, CycleOutcome, PipelineOutcome};
use rp_cluster::{
    ClusterManager, KubeInspectorFactory, PipelineProvider, StandardPipelines, Step,
    INSTALL_TIME_TOPIC,
};
use rp_common::config::BackendConfig;
use rp_logging::capture::LogCapture;
use rp_metrics::RecordingEmitter;
use rp_store::{
    ClusterDocument, ClusterProperties, DocumentStore, InMemoryDocumentStore, LeaseConfig,
    LeaseQueue, Operation, ProvisioningState,
};
use tokio_util::sync::CancellationToken;

const STAMP: &str = "0.1.0+deadbee";

fn document(key: &str, state: ProvisioningState) -> ClusterDocument {
    ClusterDocument::new(
        key,
        state,
        ClusterProperties {
            name: key.into(),
            location: "westeurope".into(),
            ..ClusterProperties::default()
        },
    )
}

fn standard_backend(store: Arc<InMemoryDocumentStore>, owner: &str) -> Backend {
    let queue = Arc::new(LeaseQueue::new(store, owner, LeaseConfig::default()));
    Backend::new(
        queue,
        Arc::new(StandardPipelines::default()),
        Arc::new(KubeInspectorFactory),
        BackendConfig::default(),
        STAMP,
    )
}

async fn drain(backend: &Backend) -> Vec<CycleOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let outcome = backend
            .process_next(&CancellationToken::new())
            .await
            .expect("cycle");
        if outcome == CycleOutcome::Idle {
            return outcomes;
        }
        outcomes.push(outcome);
    }
}

#[tokio::test]
async fn seeded_documents_run_through_standard_pipelines() {
    let seed = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/seed.example.json");
    let store = Arc::new(InMemoryDocumentStore::from_seed_file(&seed).expect("seed store"));
    let emitter = Arc::new(RecordingEmitter::new());
    let backend = standard_backend(store.clone(), "worker-a").with_emitter(emitter.clone());

    let outcomes = drain(&backend).await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().any(|outcome| matches!(
        outcome,
        CycleOutcome::Processed {
            outcome: PipelineOutcome::Deleted,
            ..
        }
    )));

    let remaining = store.list().await.expect("list");
    assert_eq!(remaining.len(), 1);
    let created = &remaining[0];
    assert_eq!(created.cluster.name, "demo-one");
    assert_eq!(created.provisioning_state, ProvisioningState::Succeeded);
    assert_eq!(created.provisioned_by, STAMP);
    assert!(created.lease_owner.is_none());

    let records = emitter.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record.topic == INSTALL_TIME_TOPIC));
    assert!(records
        .iter()
        .any(|record| record.dimensions.get("operation").map(String::as_str) == Some("delete")));
}

#[tokio::test]
async fn expired_lease_from_crashed_worker_is_reclaimed() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let mut orphan = document("orphan", ProvisioningState::Updating);
    orphan.lease_owner = Some("crashed-worker".into());
    orphan.lease_expiry = Some(Utc::now() - chrono::Duration::minutes(5));
    orphan.dequeues = 1;
    store.create(orphan).await.expect("create");

    let mut held = document("held", ProvisioningState::Creating);
    held.lease_owner = Some("live-worker".into());
    held.lease_expiry = Some(Utc::now() + chrono::Duration::hours(1));
    store.create(held).await.expect("create");

    let backend = standard_backend(store.clone(), "worker-b");
    let outcomes = drain(&backend).await;
    assert_eq!(
        outcomes,
        vec![CycleOutcome::Processed {
            key: "orphan".into(),
            outcome: PipelineOutcome::Succeeded
        }]
    );

    let orphan = store.get("orphan").await.expect("get");
    assert_eq!(orphan.provisioning_state, ProvisioningState::Succeeded);
    assert_eq!(orphan.dequeues, 0);
    let held = store.get("held").await.expect("get");
    assert_eq!(held.lease_owner.as_deref(), Some("live-worker"));
    assert_eq!(held.provisioning_state, ProvisioningState::Creating);
}

#[tokio::test]
async fn failing_pipeline_logs_unreachable_diagnostics() {
    let capture = LogCapture::new();
    let _guard = capture.set_default();
    let store = Arc::new(InMemoryDocumentStore::new());
    store
        .create(document("broken", ProvisioningState::Creating))
        .await
        .expect("create");
    let queue = Arc::new(LeaseQueue::new(store.clone(), "worker-c", LeaseConfig::default()));
    let pipelines: Arc<dyn PipelineProvider> =
        Arc::new(|_: Operation, manager: &Arc<ClusterManager>| {
            vec![
                manager.update_provisioned_by_step(),
                Step::action("failingFunc", |_| async { Err(anyhow::anyhow!("oh no!")) }),
            ]
        });
    let backend = Backend::new(
        queue,
        pipelines,
        Arc::new(KubeInspectorFactory),
        BackendConfig::default(),
        STAMP,
    );

    let outcomes = drain(&backend).await;
    assert_eq!(
        outcomes,
        vec![CycleOutcome::Processed {
            key: "broken".into(),
            outcome: PipelineOutcome::Failed {
                error: "oh no!".into()
            }
        }]
    );
    assert!(capture.contains("running step [Action update_provisioned_by]"));
    assert!(capture.contains("step [Action failingFunc] encountered error: oh no!"));
    assert!(capture.contains("cluster unreachable: cluster has no admin kubeconfig"));
    assert!(capture.contains("cluster_version: null"));
    assert!(capture.contains("ingress_controllers: null"));

    let stored = store.get("broken").await.expect("get");
    assert_eq!(stored.provisioning_state, ProvisioningState::Failed);
    assert_eq!(stored.failed_provisioning_state, Some(ProvisioningState::Creating));
    assert_eq!(stored.provisioned_by, STAMP);
}

#[tokio::test(start_paused = true)]
async fn competing_backends_process_each_document_once() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let keys: Vec<String> = (0..6).map(|i| format!("cluster-{i}")).collect();
    for key in &keys {
        store
            .create(document(key, ProvisioningState::Creating))
            .await
            .expect("create");
    }

    let runs = Arc::new(Mutex::new(Vec::<String>::new()));
    let config = BackendConfig {
        workers: 2,
        poll_interval: Duration::from_millis(100),
        ..BackendConfig::default()
    };
    let mut handles = Vec::new();
    for owner in ["worker-a", "worker-b"] {
        let seen = runs.clone();
        let pipelines: Arc<dyn PipelineProvider> =
            Arc::new(move |_: Operation, manager: &Arc<ClusterManager>| {
                let seen = seen.clone();
                let key = manager.key().to_string();
                vec![
                    Step::action("record", move |_| {
                        seen.lock().push(key.clone());
                        async { Ok(()) }
                    }),
                    manager.update_provisioned_by_step(),
                ]
            });
        let queue = Arc::new(LeaseQueue::new(store.clone(), owner, LeaseConfig::default()));
        let backend = Backend::new(
            queue,
            pipelines,
            Arc::new(KubeInspectorFactory),
            config.clone(),
            STAMP,
        );
        handles.push(backend.start());
    }

    loop {
        let documents = store.list().await.expect("list");
        if documents
            .iter()
            .all(|doc| doc.provisioning_state == ProvisioningState::Succeeded)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    for handle in &handles {
        assert!(handle.shutdown(Duration::from_secs(5)).await);
    }

    let mut seen = runs.lock().clone();
    seen.sort();
    assert_eq!(seen, keys);
}
