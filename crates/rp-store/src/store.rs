//! ---
//! rp_section: "02-persistence"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Document store adapter contract."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Typed access to cluster documents with optimistic concurrency.
//!
//! Every successful write hands back the stored document carrying a fresh
//! `concurrency_token`; a write presenting any other token is rejected with
//! [`StoreError::VersionConflict`](crate::StoreError::VersionConflict).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::ClusterDocument;
use crate::error::StoreResult;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document. Assigns `id` when empty and issues the first token.
    async fn create(&self, document: ClusterDocument) -> StoreResult<ClusterDocument>;

    /// Point read by (normalized) key.
    async fn get(&self, key: &str) -> StoreResult<ClusterDocument>;

    /// Conditional replace guarded by `document.concurrency_token`.
    async fn replace(&self, document: ClusterDocument) -> StoreResult<ClusterDocument>;

    /// Conditional delete guarded by `document.concurrency_token`.
    async fn delete(&self, document: &ClusterDocument) -> StoreResult<()>;

    /// Up to `limit` documents eligible for dequeue at `now`.
    async fn query_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ClusterDocument>>;

    /// Every stored document, ordered by key.
    async fn list(&self) -> StoreResult<Vec<ClusterDocument>>;
}
