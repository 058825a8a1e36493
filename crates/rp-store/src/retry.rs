//! ---
//! rp_section: "02-persistence"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Bounded retry for optimistic-concurrency conflicts."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::StoreError;

/// Retry policy for writes rejected with a stale concurrency token.
#[derive(Clone, Debug)]
pub struct ConflictRetry {
    /// Total attempts, including the first one. Never less than one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl ConflictRetry {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }

    /// Un-jittered delay after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Sleep before the next attempt.
    pub async fn backoff(&self, operation_name: &str, attempt: u32, err: &StoreError) {
        // 0.5x to 1.5x jitter spreads out competing writers
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = Duration::from_secs_f64(self.delay_for(attempt).as_secs_f64() * jitter);
        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = delay.as_millis() as u64,
            "write conflicted, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Run `operation` until it succeeds, fails with anything other than a
/// version conflict, or the attempts are used up.
pub async fn retry_on_conflict<F, Fut, T>(
    policy: &ConflictRetry,
    operation_name: &str,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err @ StoreError::VersionConflict { .. }) if policy.allows_retry(attempt) => {
                policy.backoff(operation_name, attempt, &err).await;
            }
            Err(err) => return Err(err),
        }
    }
}
