//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Claim, run and finish one cluster document."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::sync::Arc;

use rp_cluster::{ClusterManager, InspectorFactory, PipelineProvider};
use rp_common::config::BackendConfig;
use rp_logging::{log_lifecycle_event, rp_error, rp_info, rp_warn, LifecycleOutcome, LogContext};
use rp_metrics::{BackendMetrics, MetricsEmitter};
use rp_store::{ClusterDocument, LeaseQueue, Operation, StoreError, StoreResult};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::heartbeat::spawn_heartbeat;

/// Recorded in `last_error` for documents dequeued too many times.
pub const MAX_DEQUEUE_ERROR: &str = "exceeded maximum dequeue count";

/// Result of one worker cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was eligible.
    Idle,
    /// Another worker won every candidate; try again right away.
    Contended,
    Processed { key: String, outcome: PipelineOutcome },
}

/// What happened to a claimed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Succeeded,
    /// A delete pipeline finished and the document is gone.
    Deleted,
    Failed { error: String },
    /// Dequeued too often; marked Failed without running.
    Poisoned,
    /// The lease was lost mid-run; nothing was written.
    LeaseLost,
    /// The run was aborted; the lease was released for another worker.
    Aborted,
}

impl PipelineOutcome {
    fn label(&self) -> &'static str {
        match self {
            PipelineOutcome::Succeeded => "succeeded",
            PipelineOutcome::Deleted => "deleted",
            PipelineOutcome::Failed { .. } => "failed",
            PipelineOutcome::Poisoned => "poisoned",
            PipelineOutcome::LeaseLost => "lease_lost",
            PipelineOutcome::Aborted => "aborted",
        }
    }
}

/// Everything a worker needs to process documents.
pub struct Backend {
    queue: Arc<LeaseQueue>,
    pipelines: Arc<dyn PipelineProvider>,
    inspectors: Arc<dyn InspectorFactory>,
    emitter: Option<Arc<dyn MetricsEmitter>>,
    metrics: Option<BackendMetrics>,
    config: BackendConfig,
    build_stamp: String,
}

impl Backend {
    pub fn new(
        queue: Arc<LeaseQueue>,
        pipelines: Arc<dyn PipelineProvider>,
        inspectors: Arc<dyn InspectorFactory>,
        config: BackendConfig,
        build_stamp: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            pipelines,
            inspectors,
            emitter: None,
            metrics: None,
            config,
            build_stamp: build_stamp.into(),
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn MetricsEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_metrics(mut self, metrics: BackendMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<LeaseQueue> {
        &self.queue
    }

    fn record_dequeue(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_dequeue(outcome);
        }
    }

    /// Claim at most one document and drive it to completion.
    ///
    /// `abort` is the only thing that interrupts a running pipeline.
    pub async fn process_next(&self, abort: &CancellationToken) -> StoreResult<CycleOutcome> {
        let document = match self.queue.dequeue().await {
            Ok(document) => document,
            Err(StoreError::NotFound(_)) => {
                self.record_dequeue("empty");
                return Ok(CycleOutcome::Idle);
            }
            Err(err) if err.is_conflict() => {
                self.record_dequeue("conflict");
                return Ok(CycleOutcome::Contended);
            }
            Err(err) => {
                self.record_dequeue("error");
                return Err(err);
            }
        };
        self.record_dequeue("claimed");

        let key = document.key.clone();
        let Some(operation) = document.provisioning_state.operation() else {
            // terminal documents are never eligible; hand it straight back
            self.queue.release(&key).await?;
            return Ok(CycleOutcome::Idle);
        };
        let outcome = self.process(document, operation, abort).await?;
        Ok(CycleOutcome::Processed { key, outcome })
    }

    async fn process(
        &self,
        document: ClusterDocument,
        operation: Operation,
        abort: &CancellationToken,
    ) -> StoreResult<PipelineOutcome> {
        let key = document.key.clone();
        let ctx = LogContext::new()
            .with_cluster(&key)
            .with_worker(self.queue.owner())
            .with_operation(operation.as_str());

        if document.dequeues > self.config.max_dequeue_count {
            rp_error!(
                context = ctx,
                "{} ({} > {})",
                MAX_DEQUEUE_ERROR,
                document.dequeues,
                self.config.max_dequeue_count
            );
            self.finish(&key, |doc| {
                doc.provisioning_state = rp_store::ProvisioningState::Failed;
                doc.failed_provisioning_state = Some(operation.state());
                doc.last_error = Some(MAX_DEQUEUE_ERROR.to_string());
            })
            .await?;
            self.report(&ctx, operation, &PipelineOutcome::Poisoned, 0.0);
            return Ok(PipelineOutcome::Poisoned);
        }

        rp_info!(context = ctx, "dequeued document (attempt {})", document.dequeues);
        let inspector = self.inspectors.inspector_for(&document).await;
        let mut manager = ClusterManager::new(
            document,
            self.queue.clone(),
            inspector,
            self.build_stamp.clone(),
        );
        if let Some(emitter) = &self.emitter {
            manager = manager.with_emitter(emitter.clone());
        }
        let manager = Arc::new(manager);
        let steps = self.pipelines.pipeline(operation, &manager);

        let run = abort.child_token();
        let stop_heartbeat = CancellationToken::new();
        let heartbeat = spawn_heartbeat(
            self.queue.clone(),
            key.clone(),
            self.config.heartbeat_interval,
            run.clone(),
            stop_heartbeat.clone(),
        );

        if let Some(metrics) = &self.metrics {
            metrics.worker_busy();
        }
        let started = Instant::now();
        let result = manager.run_steps(&run, &steps).await;
        let seconds = started.elapsed().as_secs_f64();
        if let Some(metrics) = &self.metrics {
            metrics.worker_idle();
        }

        stop_heartbeat.cancel();
        let lease_lost = match heartbeat.await {
            Ok(lost) => lost,
            Err(err) => {
                rp_warn!(context = ctx, "heartbeat task failed: {}", err);
                false
            }
        };

        let outcome = if lease_lost {
            rp_warn!(context = ctx, "lease lost during pipeline, abandoning document");
            if let Some(metrics) = &self.metrics {
                metrics.record_lease_lost();
            }
            PipelineOutcome::LeaseLost
        } else if result.is_err() && abort.is_cancelled() {
            rp_warn!(context = ctx, "pipeline aborted, releasing lease");
            self.queue.release(&key).await?;
            PipelineOutcome::Aborted
        } else {
            match result {
                Ok(()) if operation == Operation::Delete => {
                    self.queue.delete_with_lease(&key).await?;
                    PipelineOutcome::Deleted
                }
                Ok(()) => {
                    self.finish(&key, |doc| {
                        doc.provisioning_state = rp_store::ProvisioningState::Succeeded;
                        doc.failed_provisioning_state = None;
                        doc.last_error = None;
                    })
                    .await?;
                    PipelineOutcome::Succeeded
                }
                Err(err) => {
                    let error = err.to_string();
                    let recorded = error.clone();
                    self.finish(&key, move |doc| {
                        doc.provisioning_state = rp_store::ProvisioningState::Failed;
                        doc.failed_provisioning_state = Some(operation.state());
                        doc.last_error = Some(recorded.clone());
                    })
                    .await?;
                    PipelineOutcome::Failed { error }
                }
            }
        };
        self.report(&ctx, operation, &outcome, seconds);
        Ok(outcome)
    }

    /// Write the final state and drop the lease in one conditional write.
    async fn finish<F>(&self, key: &str, mut mutate: F) -> StoreResult<ClusterDocument>
    where
        F: FnMut(&mut ClusterDocument) + Send,
    {
        self.queue
            .patch_with_lease(key, |doc| {
                mutate(doc);
                doc.dequeues = 0;
                doc.not_before = None;
                doc.clear_lease();
            })
            .await
    }

    fn report(&self, ctx: &LogContext<'_>, operation: Operation, outcome: &PipelineOutcome, seconds: f64) {
        if let Some(metrics) = &self.metrics {
            metrics.record_pipeline(operation.as_str(), outcome.label(), seconds);
        }
        let (result, message) = match outcome {
            PipelineOutcome::Succeeded | PipelineOutcome::Deleted => {
                (LifecycleOutcome::Success, format!("pipeline {}", outcome.label()))
            }
            PipelineOutcome::Failed { error } => {
                (LifecycleOutcome::Fault, format!("pipeline failed: {error}"))
            }
            other => (LifecycleOutcome::Fault, format!("pipeline {}", other.label())),
        };
        log_lifecycle_event(Some(ctx), "pipeline.finished", &message, result);
    }
}

/// Loop until `stop` flips or `abort` fires.
pub(crate) async fn run_worker(
    backend: Arc<Backend>,
    index: usize,
    mut stop: watch::Receiver<bool>,
    abort: CancellationToken,
) {
    debug!(worker = index, owner = %backend.queue.owner(), "worker started");
    loop {
        if *stop.borrow() || abort.is_cancelled() {
            break;
        }
        let wait = match backend.process_next(&abort).await {
            Ok(CycleOutcome::Processed { .. }) => false,
            Ok(CycleOutcome::Contended) => {
                tokio::task::yield_now().await;
                false
            }
            Ok(CycleOutcome::Idle) => true,
            Err(err) => {
                rp_warn!("worker {} cycle failed: {}", index, err);
                true
            }
        };
        if wait {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = abort.cancelled() => break,
                _ = tokio::time::sleep(backend.config.poll_interval) => {}
            }
        }
    }
    debug!(worker = index, "worker stopped");
}
