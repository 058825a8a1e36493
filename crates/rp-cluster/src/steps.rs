//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Named pipeline steps: one-shot actions and polled conditions."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Pipeline steps.
//!
//! A step is a named, idempotent unit of work. An [`Step::Action`] runs once.
//! A [`Step::Condition`] polls a predicate, checking immediately and then
//! every `poll_interval`, until it returns `true` or `timeout` elapses.
//! Both receive the run's [`CancellationToken`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub type StepFuture<T> = BoxFuture<'static, anyhow::Result<T>>;
pub type ActionFn = Arc<dyn Fn(CancellationToken) -> StepFuture<()> + Send + Sync>;
pub type ConditionFn = Arc<dyn Fn(CancellationToken) -> StepFuture<bool> + Send + Sync>;

/// Terminal outcomes of a condition that never became true.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("timed out waiting for the condition")]
    TimedOut,
    #[error("cancelled while waiting for the condition")]
    Cancelled,
}

/// The run's cancellation scope fired before the step finished.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("step cancelled")]
pub struct StepCancelled;

#[derive(Clone)]
pub enum Step {
    Action {
        name: String,
        run: ActionFn,
    },
    Condition {
        name: String,
        check: ConditionFn,
        poll_interval: Duration,
        timeout: Duration,
    },
}

impl Step {
    pub fn action<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Step::Action {
            name: name.into(),
            run: Arc::new(move |cancel| run(cancel).boxed()),
        }
    }

    pub fn condition<F, Fut>(
        name: impl Into<String>,
        poll_interval: Duration,
        timeout: Duration,
        check: F,
    ) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        Step::Condition {
            name: name.into(),
            check: Arc::new(move |cancel| check(cancel).boxed()),
            poll_interval,
            timeout,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Action { name, .. } | Step::Condition { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Action { .. } => "Action",
            Step::Condition { .. } => "Condition",
        }
    }

    /// Run the step to completion within `cancel`'s scope.
    pub async fn execute(&self, cancel: &CancellationToken) -> anyhow::Result<()> {
        match self {
            Step::Action { run, .. } => run(cancel.clone()).await,
            Step::Condition {
                check,
                poll_interval,
                timeout,
                ..
            } => poll_condition(check, *poll_interval, *timeout, cancel).await,
        }
    }
}

async fn poll_condition(
    check: &ConditionFn,
    poll_interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(ConditionError::Cancelled.into());
        }
        if check(cancel.clone()).await? {
            return Ok(());
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(ConditionError::TimedOut.into());
        }
        let wait = poll_interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return Err(ConditionError::Cancelled.into()),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Action { name, .. } => f.debug_struct("Action").field("name", name).finish(),
            Step::Condition {
                name,
                poll_interval,
                timeout,
                ..
            } => f
                .debug_struct("Condition")
                .field("name", name)
                .field("poll_interval", poll_interval)
                .field("timeout", timeout)
                .finish(),
        }
    }
}
