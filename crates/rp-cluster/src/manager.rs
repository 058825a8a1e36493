//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Per-document manager binding pipelines to a leased cluster."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use rp_metrics::MetricsEmitter;
use rp_store::{ClusterDocument, LeaseQueue, Operation, StoreError};
use tokio_util::sync::CancellationToken;

use crate::diagnostics::{ClusterInspector, DiagnosticsError};
use crate::runner::{StepError, StepRunner};
use crate::steps::Step;

pub const UPDATE_PROVISIONED_BY_STEP: &str = "update_provisioned_by";
pub const WAIT_FOR_API_SERVER_STEP: &str = "wait_for_api_server";

/// Owns one claimed document for the duration of a pipeline.
///
/// All writes go through the lease queue, so they fail once the lease is
/// lost. The local copy always reflects the last successful write.
pub struct ClusterManager {
    key: String,
    document: Mutex<ClusterDocument>,
    queue: Arc<LeaseQueue>,
    inspector: Arc<dyn ClusterInspector>,
    emitter: Option<Arc<dyn MetricsEmitter>>,
    build_stamp: String,
}

impl ClusterManager {
    pub fn new(
        document: ClusterDocument,
        queue: Arc<LeaseQueue>,
        inspector: Arc<dyn ClusterInspector>,
        build_stamp: impl Into<String>,
    ) -> Self {
        Self {
            key: document.key.clone(),
            document: Mutex::new(document),
            queue,
            inspector,
            emitter: None,
            build_stamp: build_stamp.into(),
        }
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn MetricsEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn build_stamp(&self) -> &str {
        &self.build_stamp
    }

    /// Snapshot of the latest known document.
    pub fn document(&self) -> ClusterDocument {
        self.document.lock().clone()
    }

    pub fn operation(&self) -> Option<Operation> {
        self.document.lock().provisioning_state.operation()
    }

    /// Lease-guarded read-modify-write of the document.
    pub async fn patch<F>(&self, mutate: F) -> Result<ClusterDocument, StoreError>
    where
        F: FnMut(&mut ClusterDocument) + Send,
    {
        let updated = self.queue.patch_with_lease(&self.key, mutate).await?;
        *self.document.lock() = updated.clone();
        Ok(updated)
    }

    /// Record this build as the last writer of the document.
    pub async fn update_provisioned_by(&self) -> Result<(), StoreError> {
        let stamp = self.build_stamp.clone();
        self.patch(move |document| document.provisioned_by = stamp.clone())
            .await?;
        Ok(())
    }

    /// The API server answers once the cluster version resource is readable.
    pub async fn api_server_ready(&self) -> anyhow::Result<bool> {
        match self.inspector.cluster_version().await {
            Ok(_) => Ok(true),
            Err(DiagnosticsError::NotFound { .. }) | Err(DiagnosticsError::Unreachable(_)) => {
                Ok(false)
            }
            Err(DiagnosticsError::Api(message)) => {
                tracing::debug!(key = %self.key, error = %message, "api server not ready yet");
                Ok(false)
            }
        }
    }

    pub fn update_provisioned_by_step(self: &Arc<Self>) -> Step {
        let manager = Arc::clone(self);
        Step::action(UPDATE_PROVISIONED_BY_STEP, move |_cancel| {
            let manager = manager.clone();
            async move {
                manager
                    .update_provisioned_by()
                    .await
                    .context("failed to record provisioned_by")
            }
        })
    }

    pub fn wait_for_api_server_step(
        self: &Arc<Self>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Step {
        let manager = Arc::clone(self);
        Step::condition(
            WAIT_FOR_API_SERVER_STEP,
            poll_interval,
            timeout,
            move |_cancel| {
                let manager = manager.clone();
                async move { manager.api_server_ready().await }
            },
        )
    }

    /// Run `steps` against this cluster.
    pub async fn run_steps(
        &self,
        cancel: &CancellationToken,
        steps: &[Step],
    ) -> Result<(), StepError> {
        let mut runner = StepRunner::new(self.inspector.clone())
            .with_cluster(self.key.clone())
            .with_dimensions(self.metric_dimensions());
        if let Some(emitter) = &self.emitter {
            runner = runner.with_emitter(emitter.clone());
        }
        runner.run(cancel, steps).await
    }

    fn metric_dimensions(&self) -> HashMap<String, String> {
        let document = self.document.lock();
        let mut dimensions = HashMap::new();
        dimensions.insert("location".to_string(), document.cluster.location.clone());
        if let Some(operation) = document.provisioning_state.operation() {
            dimensions.insert("operation".to_string(), operation.as_str().to_string());
        }
        dimensions
    }
}
