//! ---
//! rp_section: "02-persistence"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Document store adapter and lease queue."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Shared document store used as both the work queue and the state
//! repository of the provisioning backend.

pub mod document;
pub mod error;
pub mod lease;
pub mod memory;
pub mod retry;
pub mod store;

pub use document::{normalize_key, ClusterDocument, ClusterProperties, Operation, ProvisioningState};
pub use error::{StoreError, StoreResult};
pub use lease::{LeaseConfig, LeaseQueue};
pub use memory::{load_seed_file, InMemoryDocumentStore};
pub use retry::{retry_on_conflict, ConflictRetry};
pub use store::DocumentStore;
