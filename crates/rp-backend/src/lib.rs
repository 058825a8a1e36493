//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Worker pool driving cluster documents through pipelines."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Worker loop of the provisioning backend.
//!
//! [`Backend::start`] spawns `workers` tasks that repeatedly dequeue a
//! document, run the pipeline for its state and persist the result. Stopping
//! prevents new dequeues; aborting cancels in-flight pipelines.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod heartbeat;
pub mod worker;

pub use worker::{Backend, CycleOutcome, PipelineOutcome, MAX_DEQUEUE_ERROR};

impl Backend {
    /// Spawn the worker tasks.
    pub fn start(self) -> BackendHandle {
        let backend = Arc::new(self);
        let (stop, stop_rx) = watch::channel(false);
        let abort = CancellationToken::new();
        let count = backend.config().workers.max(1);
        let workers = (0..count)
            .map(|index| {
                tokio::spawn(worker::run_worker(
                    backend.clone(),
                    index,
                    stop_rx.clone(),
                    abort.clone(),
                ))
            })
            .collect();
        info!(workers = count, owner = %backend.queue().owner(), "backend started");
        BackendHandle {
            stop,
            abort,
            workers: Mutex::new(workers),
        }
    }
}

/// Handle to running workers.
#[derive(Debug)]
pub struct BackendHandle {
    stop: watch::Sender<bool>,
    abort: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl BackendHandle {
    /// Stop dequeuing. In-flight pipelines run to completion.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Cancel in-flight pipelines.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    /// Wait for every worker to exit.
    pub async fn join(&self) {
        let mut workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        drain_workers(&mut workers).await;
    }

    /// Stop, give in-flight pipelines `grace` to finish, then abort them.
    /// Returns `true` when everything finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop();
        let mut workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if tokio::time::timeout(grace, drain_workers(&mut workers))
            .await
            .is_ok()
        {
            info!("backend stopped");
            return true;
        }
        warn!(
            grace_secs = grace.as_secs(),
            remaining = workers.len(),
            "grace period elapsed, aborting in-flight pipelines"
        );
        self.abort();
        drain_workers(&mut workers).await;
        false
    }
}

// A handle is popped only once it has completed, so an interrupted drain can
// be resumed.
async fn drain_workers(workers: &mut Vec<JoinHandle<()>>) {
    while let Some(worker) = workers.last_mut() {
        if let Err(err) = worker.await {
            warn!(error = %err, "worker join error");
        }
        workers.pop();
    }
}
