//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Lease renewal while a pipeline runs."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use rp_store::{LeaseQueue, StoreError};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Renews the lease on `key` every `every` until `stop` fires.
///
/// When the lease turns out to be gone the run's scope is cancelled and the
/// task resolves to `true`.
pub(crate) fn spawn_heartbeat(
    queue: Arc<LeaseQueue>,
    key: String,
    every: Duration,
    run: CancellationToken,
    stop: CancellationToken,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; the lease was just taken
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => return false,
                _ = ticker.tick() => {
                    match queue.renew(&key).await {
                        Ok(document) => {
                            debug!(key = %key, expiry = ?document.lease_expiry, "lease renewed");
                        }
                        Err(err @ (StoreError::LeaseLost { .. } | StoreError::NotFound(_))) => {
                            warn!(key = %key, error = %err, "lease lost, cancelling run");
                            run.cancel();
                            return true;
                        }
                        Err(err) => {
                            warn!(key = %key, error = %err, "lease renewal failed, will retry");
                        }
                    }
                }
            }
        }
    })
}
