//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Worker loop behaviour against the in-memory store."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rp_backend::{Backend, CycleOutcome, PipelineOutcome, MAX_DEQUEUE_ERROR};
use rp_cluster::{
    ClusterManager, FixedInspectorFactory, PipelineProvider, StaticInspector, Step,
};
use rp_common::config::BackendConfig;
use rp_metrics::{new_registry, BackendMetrics};
use rp_store::{
    ClusterDocument, ClusterProperties, DocumentStore, InMemoryDocumentStore, LeaseConfig,
    LeaseQueue, Operation, ProvisioningState,
};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const STAMP: &str = "abc1234";

fn document(key: &str, state: ProvisioningState) -> ClusterDocument {
    ClusterDocument::new(
        key,
        state,
        ClusterProperties {
            name: key.into(),
            location: "eastus".into(),
            ..ClusterProperties::default()
        },
    )
}

async fn seeded(documents: Vec<ClusterDocument>) -> Arc<InMemoryDocumentStore> {
    let store = Arc::new(InMemoryDocumentStore::new());
    for doc in documents {
        store.create(doc).await.expect("create");
    }
    store
}

fn backend(
    store: Arc<InMemoryDocumentStore>,
    pipelines: Arc<dyn PipelineProvider>,
    config: BackendConfig,
) -> Backend {
    let queue = Arc::new(LeaseQueue::new(store, "worker-a", LeaseConfig::default()));
    Backend::new(
        queue,
        pipelines,
        Arc::new(FixedInspectorFactory::new(Arc::new(StaticInspector::new()))),
        config,
        STAMP,
    )
}

fn provisioned_by_only() -> Arc<dyn PipelineProvider> {
    Arc::new(|_: Operation, manager: &Arc<ClusterManager>| {
        vec![manager.update_provisioned_by_step()]
    })
}

#[tokio::test]
async fn successful_create_marks_succeeded_and_releases() {
    let store = seeded(vec![document("a", ProvisioningState::Creating)]).await;
    let metrics = BackendMetrics::new(new_registry()).expect("metrics");
    let backend = backend(store.clone(), provisioned_by_only(), BackendConfig::default())
        .with_metrics(metrics.clone());

    let outcome = backend
        .process_next(&CancellationToken::new())
        .await
        .expect("cycle");
    assert_eq!(
        outcome,
        CycleOutcome::Processed {
            key: "a".into(),
            outcome: PipelineOutcome::Succeeded
        }
    );

    let stored = store.get("a").await.expect("get");
    assert_eq!(stored.provisioning_state, ProvisioningState::Succeeded);
    assert_eq!(stored.provisioned_by, STAMP);
    assert!(stored.lease_owner.is_none());
    assert_eq!(stored.dequeues, 0);
    assert_eq!(metrics.dequeue_count("claimed"), 1);
    assert_eq!(metrics.pipeline_count("create", "succeeded"), 1);
    assert_eq!(metrics.busy_workers(), 0);

    assert_eq!(
        backend.process_next(&CancellationToken::new()).await.expect("cycle"),
        CycleOutcome::Idle
    );
    assert_eq!(metrics.dequeue_count("empty"), 1);
}

#[tokio::test]
async fn failed_pipeline_records_error() {
    let store = seeded(vec![document("a", ProvisioningState::Updating)]).await;
    let pipelines: Arc<dyn PipelineProvider> =
        Arc::new(|_: Operation, _: &Arc<ClusterManager>| {
            vec![Step::action("failingFunc", |_| async {
                Err(anyhow::anyhow!("oh no!"))
            })]
        });
    let backend = backend(store.clone(), pipelines, BackendConfig::default());

    let outcome = backend
        .process_next(&CancellationToken::new())
        .await
        .expect("cycle");
    assert_eq!(
        outcome,
        CycleOutcome::Processed {
            key: "a".into(),
            outcome: PipelineOutcome::Failed {
                error: "oh no!".into()
            }
        }
    );
    let stored = store.get("a").await.expect("get");
    assert_eq!(stored.provisioning_state, ProvisioningState::Failed);
    assert_eq!(
        stored.failed_provisioning_state,
        Some(ProvisioningState::Updating)
    );
    assert_eq!(stored.last_error.as_deref(), Some("oh no!"));
    assert!(stored.lease_owner.is_none());
}

#[tokio::test]
async fn successful_delete_removes_document() {
    let store = seeded(vec![document("gone", ProvisioningState::Deleting)]).await;
    let backend = backend(store.clone(), provisioned_by_only(), BackendConfig::default());

    let outcome = backend
        .process_next(&CancellationToken::new())
        .await
        .expect("cycle");
    assert_eq!(
        outcome,
        CycleOutcome::Processed {
            key: "gone".into(),
            outcome: PipelineOutcome::Deleted
        }
    );
    assert!(store.is_empty());
}

#[tokio::test]
async fn over_dequeued_documents_are_failed_without_running() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let mut poison = document("poison", ProvisioningState::Creating);
    poison.dequeues = 5;
    store.create(poison).await.expect("create");

    let runs = Arc::new(AtomicU32::new(0));
    let counter = runs.clone();
    let pipelines: Arc<dyn PipelineProvider> =
        Arc::new(move |_: Operation, _: &Arc<ClusterManager>| {
            let counter = counter.clone();
            vec![Step::action("count", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })]
        });
    let config = BackendConfig {
        max_dequeue_count: 5,
        ..BackendConfig::default()
    };
    let backend = backend(store.clone(), pipelines, config);

    let outcome = backend
        .process_next(&CancellationToken::new())
        .await
        .expect("cycle");
    assert!(matches!(
        outcome,
        CycleOutcome::Processed {
            outcome: PipelineOutcome::Poisoned,
            ..
        }
    ));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    let stored = store.get("poison").await.expect("get");
    assert_eq!(stored.provisioning_state, ProvisioningState::Failed);
    assert_eq!(stored.last_error.as_deref(), Some(MAX_DEQUEUE_ERROR));
}

#[tokio::test(start_paused = true)]
async fn lost_lease_cancels_run_and_writes_nothing() {
    let store = seeded(vec![document("stolen", ProvisioningState::Creating)]).await;
    let thief_store = store.clone();
    let pipelines: Arc<dyn PipelineProvider> =
        Arc::new(move |_: Operation, _: &Arc<ClusterManager>| {
            let store = thief_store.clone();
            vec![Step::action("slow", move |_| {
                let store = store.clone();
                async move {
                    let mut doc = store.get("stolen").await?;
                    doc.lease_owner = Some("thief".into());
                    store.replace(doc).await?;
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok::<(), anyhow::Error>(())
                }
            })]
        });
    let config = BackendConfig {
        heartbeat_interval: Duration::from_secs(10),
        ..BackendConfig::default()
    };
    let backend = backend(store.clone(), pipelines, config);

    let outcome = backend
        .process_next(&CancellationToken::new())
        .await
        .expect("cycle");
    assert!(matches!(
        outcome,
        CycleOutcome::Processed {
            outcome: PipelineOutcome::LeaseLost,
            ..
        }
    ));
    let stored = store.get("stolen").await.expect("get");
    assert_eq!(stored.lease_owner.as_deref(), Some("thief"));
    assert_eq!(stored.provisioning_state, ProvisioningState::Creating);
}

#[tokio::test(start_paused = true)]
async fn started_workers_drain_the_backlog_then_stop() {
    let store = seeded(vec![
        document("one", ProvisioningState::Creating),
        document("two", ProvisioningState::Updating),
        document("three", ProvisioningState::Creating),
    ])
    .await;
    let config = BackendConfig {
        workers: 2,
        poll_interval: Duration::from_millis(100),
        ..BackendConfig::default()
    };
    let handle = backend(store.clone(), provisioned_by_only(), config).start();

    loop {
        let documents = store.list().await.expect("list");
        if documents
            .iter()
            .all(|d| d.provisioning_state == ProvisioningState::Succeeded)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(handle.shutdown(Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_pipelines_after_grace() {
    let store = seeded(vec![document("slow", ProvisioningState::Creating)]).await;
    let started = Arc::new(Notify::new());
    let signal = started.clone();
    let pipelines: Arc<dyn PipelineProvider> =
        Arc::new(move |_: Operation, _: &Arc<ClusterManager>| {
            let signal = signal.clone();
            vec![Step::action("forever", move |_| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                    Ok(())
                }
            })]
        });
    let config = BackendConfig {
        workers: 1,
        ..BackendConfig::default()
    };
    let handle = backend(store.clone(), pipelines, config).start();
    started.notified().await;

    assert!(!handle.shutdown(Duration::from_secs(1)).await);
    let stored = store.get("slow").await.expect("get");
    assert!(stored.lease_owner.is_none());
    assert_eq!(stored.provisioning_state, ProvisioningState::Creating);
}

#[tokio::test]
async fn stop_lets_the_claimed_document_finish_and_claims_nothing_more() {
    let store = seeded(vec![
        document("first", ProvisioningState::Creating),
        document("second", ProvisioningState::Creating),
    ])
    .await;
    let started = Arc::new(Notify::new());
    let proceed = Arc::new(Notify::new());
    let (signal, gate) = (started.clone(), proceed.clone());
    let pipelines: Arc<dyn PipelineProvider> =
        Arc::new(move |_: Operation, manager: &Arc<ClusterManager>| {
            let (signal, gate) = (signal.clone(), gate.clone());
            vec![
                Step::action("gated", move |_| {
                    let (signal, gate) = (signal.clone(), gate.clone());
                    async move {
                        signal.notify_one();
                        gate.notified().await;
                        Ok(())
                    }
                }),
                manager.update_provisioned_by_step(),
            ]
        });
    let config = BackendConfig {
        workers: 1,
        ..BackendConfig::default()
    };
    let handle = backend(store.clone(), pipelines, config).start();
    started.notified().await;

    handle.stop();
    proceed.notify_one();
    handle.join().await;

    let first = store.get("first").await.expect("get");
    assert_eq!(first.provisioning_state, ProvisioningState::Succeeded);
    assert_eq!(first.provisioned_by, STAMP);
    assert!(first.lease_owner.is_none());

    let second = store.get("second").await.expect("get");
    assert_eq!(second.provisioning_state, ProvisioningState::Creating);
    assert_eq!(second.dequeues, 0);
    assert!(second.lease_owner.is_none());
}
