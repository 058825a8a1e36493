//! ---
//! rp_section: "02-persistence"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Error taxonomy for store and lease operations."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use thiserror::Error;

/// Errors raised by the document store and the lease queue.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing matched. For `dequeue` this means no document is eligible.
    #[error("not found: {0}")]
    NotFound(String),
    /// Every eligible candidate was claimed by another worker first.
    #[error("lease conflict: {0}")]
    LeaseConflict(String),
    /// The concurrency token presented with a write is stale.
    #[error("concurrency token for {key} is stale")]
    VersionConflict { key: String },
    /// The caller no longer holds a live lease on the document.
    #[error("lost lease on {key} (owner {owner})")]
    LeaseLost { key: String, owner: String },
    #[error("document {0} already exists")]
    AlreadyExists(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Transient contention: another writer got there first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::LeaseConflict(_) | StoreError::VersionConflict { .. }
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
