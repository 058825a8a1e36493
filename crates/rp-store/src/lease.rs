//! ---
//! rp_section: "02-persistence"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Lease-based work queue over the document store."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Lease queue: many workers share one backlog of cluster documents.
//!
//! A worker claims a document by CAS-writing its identity and an expiry into
//! the lease fields. There is no lock service; the store's conditional replace
//! decides every race. A crashed worker's lease simply runs out, after which
//! the document is eligible again even though `lease_owner` is still set.
//! Every mutation made while processing goes through [`LeaseQueue::patch_with_lease`],
//! which refuses to write once the lease has been lost.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::document::{normalize_key, ClusterDocument};
use crate::error::{StoreError, StoreResult};
use crate::retry::{retry_on_conflict, ConflictRetry};
use crate::store::DocumentStore;

/// Lease tuning knobs.
#[derive(Clone, Debug)]
pub struct LeaseConfig {
    pub ttl: Duration,
    /// Candidates fetched per dequeue attempt.
    pub batch_size: usize,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            batch_size: 10,
        }
    }
}

impl LeaseConfig {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX / 2);
    chrono::Duration::milliseconds(millis)
}

/// Queue view of the store for one worker identity.
pub struct LeaseQueue {
    store: Arc<dyn DocumentStore>,
    owner: String,
    config: LeaseConfig,
    retry: ConflictRetry,
}

impl LeaseQueue {
    pub fn new(store: Arc<dyn DocumentStore>, owner: impl Into<String>, config: LeaseConfig) -> Self {
        Self {
            store,
            owner: owner.into(),
            config,
            retry: ConflictRetry::default(),
        }
    }

    pub fn with_retry(mut self, retry: ConflictRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Worker identity written into `lease_owner`.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono_duration(self.config.ttl)
    }

    /// Claim one eligible document.
    ///
    /// Returns `NotFound` when nothing is eligible and `LeaseConflict` when
    /// every candidate was claimed by someone else between query and write.
    /// The claimed document carries the lease fields and an incremented
    /// `dequeues` counter.
    pub async fn dequeue(&self) -> StoreResult<ClusterDocument> {
        let now = Utc::now();
        let candidates = self
            .store
            .query_eligible(now, self.config.batch_size.max(1))
            .await?;
        if candidates.is_empty() {
            return Err(StoreError::NotFound("no eligible documents".into()));
        }

        let total = candidates.len();
        for mut candidate in candidates {
            let key = candidate.key.clone();
            candidate.lease_owner = Some(self.owner.clone());
            candidate.lease_expiry = Some(self.expiry_from(now));
            candidate.dequeues = candidate.dequeues.saturating_add(1);
            match self.store.replace(candidate).await {
                Ok(claimed) => {
                    debug!(key = %claimed.key, owner = %self.owner, dequeues = claimed.dequeues, "document leased");
                    return Ok(claimed);
                }
                // Lost the race for this one, or it vanished; try the next.
                Err(err) if err.is_conflict() || err.is_not_found() => {
                    debug!(key = %key, error = %err, "candidate taken by another worker");
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::LeaseConflict(format!(
            "all {total} eligible documents were claimed concurrently"
        )))
    }

    /// Point read by key.
    pub async fn get(&self, key: &str) -> StoreResult<ClusterDocument> {
        self.store.get(key).await
    }

    /// Conditional write using `document.concurrency_token`.
    pub async fn write(&self, document: ClusterDocument) -> StoreResult<ClusterDocument> {
        self.store.replace(document).await
    }

    /// Re-read, check the lease is still ours and live, apply `mutate`, then
    /// CAS-write. Version conflicts are retried with the configured policy.
    pub async fn patch_with_lease<F>(&self, key: &str, mut mutate: F) -> StoreResult<ClusterDocument>
    where
        F: FnMut(&mut ClusterDocument) + Send,
    {
        let key = normalize_key(key);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut document = self.store.get(&key).await?;
            self.ensure_held(&document, Utc::now())?;
            mutate(&mut document);
            match self.store.replace(document).await {
                Ok(updated) => return Ok(updated),
                Err(err @ StoreError::VersionConflict { .. }) if self.retry.allows_retry(attempt) => {
                    self.retry.backoff("patch_with_lease", attempt, &err).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Extend the lease by a full TTL.
    pub async fn renew(&self, key: &str) -> StoreResult<ClusterDocument> {
        let ttl = chrono_duration(self.config.ttl);
        self.patch_with_lease(key, |document| {
            document.lease_expiry = Some(Utc::now() + ttl);
        })
        .await
    }

    /// Clear the lease fields. A lease that already passed to another owner is
    /// left alone.
    pub async fn release(&self, key: &str) -> StoreResult<ClusterDocument> {
        self.release_inner(key, None).await
    }

    /// Release and keep the document out of dequeue for `delay`.
    pub async fn release_with_backoff(&self, key: &str, delay: Duration) -> StoreResult<ClusterDocument> {
        self.release_inner(key, Some(delay)).await
    }

    async fn release_inner(&self, key: &str, delay: Option<Duration>) -> StoreResult<ClusterDocument> {
        let key = normalize_key(key);
        let key = key.as_str();
        retry_on_conflict(&self.retry, "release", || async move {
            let mut document = self.store.get(key).await?;
            if document.lease_owner.as_deref() != Some(self.owner.as_str()) {
                warn!(
                    key = %key,
                    owner = ?document.lease_owner,
                    "lease held by another worker, skipping release"
                );
                return Ok(document);
            }
            document.clear_lease();
            if let Some(delay) = delay {
                document.not_before = Some(Utc::now() + chrono_duration(delay));
            }
            self.store.replace(document).await
        })
        .await
    }

    /// Conditionally delete a document we hold a lease on.
    pub async fn delete_with_lease(&self, key: &str) -> StoreResult<()> {
        let key = normalize_key(key);
        let key = key.as_str();
        retry_on_conflict(&self.retry, "delete_with_lease", || async move {
            let document = self.store.get(key).await?;
            self.ensure_held(&document, Utc::now())?;
            self.store.delete(&document).await
        })
        .await
    }

    fn ensure_held(&self, document: &ClusterDocument, now: DateTime<Utc>) -> StoreResult<()> {
        if document.is_held_by(&self.owner, now) {
            Ok(())
        } else {
            Err(StoreError::LeaseLost {
                key: document.key.clone(),
                owner: self.owner.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ClusterProperties, ProvisioningState};
    use crate::memory::InMemoryDocumentStore;

    async fn queue_with(keys: &[&str], owner: &str) -> (Arc<InMemoryDocumentStore>, LeaseQueue) {
        let store = Arc::new(InMemoryDocumentStore::new());
        for key in keys {
            store
                .create(ClusterDocument::new(
                    *key,
                    ProvisioningState::Creating,
                    ClusterProperties::default(),
                ))
                .await
                .expect("create");
        }
        let queue = LeaseQueue::new(store.clone(), owner, LeaseConfig::default());
        (store, queue)
    }

    #[tokio::test]
    async fn dequeue_populates_lease_fields() {
        let (_store, queue) = queue_with(&["a"], "worker-1").await;
        let before = Utc::now();
        let claimed = queue.dequeue().await.expect("claimed");
        assert_eq!(claimed.lease_owner.as_deref(), Some("worker-1"));
        assert!(claimed.lease_expiry.expect("expiry") > before);
        assert_eq!(claimed.dequeues, 1);

        let err = queue.dequeue().await.expect_err("nothing left");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn empty_store_is_not_found() {
        let (_store, queue) = queue_with(&[], "worker-1").await;
        assert!(matches!(
            queue.dequeue().await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn patch_requires_a_live_lease() {
        let (store, queue) = queue_with(&["a"], "worker-1").await;
        let err = queue
            .patch_with_lease("a", |doc| doc.provisioned_by = "x".into())
            .await
            .expect_err("never leased");
        assert!(matches!(err, StoreError::LeaseLost { .. }));

        queue.dequeue().await.expect("claimed");
        let patched = queue
            .patch_with_lease("A", |doc| doc.provisioned_by = "x".into())
            .await
            .expect("patched");
        assert_eq!(patched.provisioned_by, "x");

        // another worker takes over the lease
        let mut stolen = store.get("a").await.expect("get");
        stolen.lease_owner = Some("worker-2".into());
        store.replace(stolen).await.expect("steal");
        assert!(queue.renew("a").await.is_err());
    }

    #[tokio::test]
    async fn renew_pushes_expiry_forward() {
        let (_store, queue) = queue_with(&["a"], "worker-1").await;
        let claimed = queue.dequeue().await.expect("claimed");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let renewed = queue.renew("a").await.expect("renewed");
        assert!(renewed.lease_expiry > claimed.lease_expiry);
        assert_ne!(renewed.concurrency_token, claimed.concurrency_token);
    }

    #[tokio::test]
    async fn release_leaves_foreign_leases_alone() {
        let (store, queue) = queue_with(&["a"], "worker-1").await;
        queue.dequeue().await.expect("claimed");
        let released = queue.release("a").await.expect("released");
        assert!(released.lease_owner.is_none());
        assert!(released.lease_expiry.is_none());

        let other = LeaseQueue::new(store.clone(), "worker-2", LeaseConfig::default());
        other.dequeue().await.expect("claimed by worker-2");
        let untouched = queue.release("a").await.expect("no-op");
        assert_eq!(untouched.lease_owner.as_deref(), Some("worker-2"));
    }

    #[tokio::test]
    async fn release_with_backoff_delays_eligibility() {
        let (_store, queue) = queue_with(&["a"], "worker-1").await;
        queue.dequeue().await.expect("claimed");
        let released = queue
            .release_with_backoff("a", Duration::from_secs(300))
            .await
            .expect("released");
        assert!(released.not_before.expect("not_before") > Utc::now());
        assert!(queue.dequeue().await.expect_err("delayed").is_not_found());
    }

    #[tokio::test]
    async fn delete_with_lease_removes_document() {
        let (store, queue) = queue_with(&["a"], "worker-1").await;
        assert!(queue.delete_with_lease("a").await.is_err());
        queue.dequeue().await.expect("claimed");
        queue.delete_with_lease("a").await.expect("deleted");
        assert!(store.is_empty());
    }
}
