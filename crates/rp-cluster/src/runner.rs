//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Fail-fast step runner with diagnostics and install timing."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rp_logging::{rp_error, rp_info, LogContext};
use rp_metrics::MetricsEmitter;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::diagnostics::{self, ClusterInspector};
use crate::steps::{Step, StepCancelled};

/// Gauge topic carrying the whole seconds a successful pipeline took.
pub const INSTALL_TIME_TOPIC: &str = "backend.cluster.installtime";

/// A step failed and the run stopped there. Displays exactly as the cause.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct StepError {
    /// Display name of the failing step, e.g. `Action update_provisioned_by`.
    pub step: String,
    pub cause: anyhow::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Timing of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallationRecord {
    pub elapsed: Duration,
}

/// Runs one pipeline against one cluster.
pub struct StepRunner {
    cluster: String,
    inspector: Arc<dyn ClusterInspector>,
    emitter: Option<Arc<dyn MetricsEmitter>>,
    dimensions: HashMap<String, String>,
    state: RunState,
    installation: Option<InstallationRecord>,
}

impl StepRunner {
    pub fn new(inspector: Arc<dyn ClusterInspector>) -> Self {
        Self {
            cluster: String::new(),
            inspector,
            emitter: None,
            dimensions: HashMap::new(),
            state: RunState::Pending,
            installation: None,
        }
    }

    /// Cluster key attached to every log event.
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn MetricsEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn with_dimensions(mut self, dimensions: HashMap<String, String>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn installation(&self) -> Option<InstallationRecord> {
        self.installation
    }

    /// Execute `steps` in order, stopping at the first error.
    ///
    /// On failure the diagnostics probes run and their results are logged
    /// before the step's error is returned untouched. On success the elapsed
    /// time is emitted once under [`INSTALL_TIME_TOPIC`].
    pub async fn run(
        &mut self,
        cancel: &CancellationToken,
        steps: &[Step],
    ) -> Result<(), StepError> {
        let ctx = LogContext::new().with_cluster(&self.cluster);
        self.state = RunState::Running;
        self.installation = None;
        let started = Instant::now();

        for step in steps {
            rp_info!(context = ctx, "running step [{}]", step);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(anyhow::Error::new(StepCancelled)),
                result = step.execute(cancel) => result,
            };
            if let Err(cause) = outcome {
                rp_error!(context = ctx, "step [{}] encountered error: {}", step, cause);
                self.state = RunState::Failed;
                diagnostics::collect(self.inspector.as_ref(), &ctx).await;
                return Err(StepError {
                    step: step.to_string(),
                    cause,
                });
            }
        }

        let elapsed = started.elapsed();
        self.state = RunState::Succeeded;
        self.installation = Some(InstallationRecord { elapsed });
        if let Some(emitter) = &self.emitter {
            let seconds = i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX);
            emitter.emit_gauge(INSTALL_TIME_TOPIC, seconds, &self.dimensions);
        }
        Ok(())
    }
}
