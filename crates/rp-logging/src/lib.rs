//! ---
//! rp_section: "03-logging"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Structured logging context and lifecycle events."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Logging helpers shared by the backend crates.

use tracing::Level;

pub mod capture;
pub mod macros;

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Normalized key of the cluster document being processed.
    pub cluster: Option<&'a str>,
    /// Identity of the worker holding the lease.
    pub worker: Option<&'a str>,
    /// Lifecycle operation (create, update, delete).
    pub operation: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a cluster key.
    pub fn with_cluster(mut self, cluster: &'a str) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Attach a worker identity.
    pub fn with_worker(mut self, worker: &'a str) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Attach a lifecycle operation.
    pub fn with_operation(mut self, operation: &'a str) -> Self {
        self.operation = Some(operation);
        self
    }
}

/// Outcome attached to lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl LifecycleOutcome {
    /// Stable label for the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event. Faults are logged at error level.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    let cluster = ctx.cluster.unwrap_or("");
    let worker = ctx.worker.unwrap_or("");
    let operation = ctx.operation.unwrap_or("");
    // `tracing::event!` needs a constant level.
    match outcome {
        LifecycleOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            cluster,
            worker,
            operation,
            message = %message
        ),
        LifecycleOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            cluster,
            worker,
            operation,
            message = %message
        ),
    }
}
