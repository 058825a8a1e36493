//! ---
//! rp_section: "02-persistence"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Cluster document model persisted in the shared store."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a cluster document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisioningState {
    Creating,
    Updating,
    Deleting,
    Succeeded,
    Failed,
}

impl ProvisioningState {
    /// Succeeded and Failed are never picked up by a worker.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProvisioningState::Succeeded | ProvisioningState::Failed)
    }

    /// Lifecycle operation a worker runs for this state.
    pub fn operation(self) -> Option<Operation> {
        match self {
            ProvisioningState::Creating => Some(Operation::Create),
            ProvisioningState::Updating => Some(Operation::Update),
            ProvisioningState::Deleting => Some(Operation::Delete),
            ProvisioningState::Succeeded | ProvisioningState::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningState::Creating => "Creating",
            ProvisioningState::Updating => "Updating",
            ProvisioningState::Deleting => "Deleting",
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Failed => "Failed",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle operation driven by a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Non-terminal state a document carries while this operation is pending.
    pub fn state(self) -> ProvisioningState {
        match self {
            Operation::Create => ProvisioningState::Creating,
            Operation::Update => ProvisioningState::Updating,
            Operation::Delete => ProvisioningState::Deleting,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer-facing cluster definition carried inside the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterProperties {
    #[serde(default)]
    pub resource_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub kubernetes_version: String,
    /// Admin kubeconfig (YAML) for the target cluster, once one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_kubeconfig: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Unit of work and state record for one cluster.
///
/// `concurrency_token` must be presented unchanged on every write. Lease
/// fields are only present while a worker holds the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDocument {
    #[serde(default)]
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub concurrency_token: String,
    pub provisioning_state: ProvisioningState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_provisioning_state: Option<ProvisioningState>,
    #[serde(default)]
    pub provisioned_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dequeues: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub cluster: ClusterProperties,
}

/// Keys are compared case-insensitively.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}

impl ClusterDocument {
    /// Fresh document as the front door would write it.
    pub fn new(
        key: impl AsRef<str>,
        state: ProvisioningState,
        cluster: ClusterProperties,
    ) -> Self {
        Self {
            id: String::new(),
            key: normalize_key(key.as_ref()),
            concurrency_token: String::new(),
            provisioning_state: state,
            failed_provisioning_state: None,
            provisioned_by: String::new(),
            lease_owner: None,
            lease_expiry: None,
            dequeues: 0,
            not_before: None,
            last_error: None,
            cluster,
        }
    }

    /// A lease is live while an owner is recorded and the expiry lies ahead.
    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        self.lease_owner.is_some() && self.lease_expiry.is_some_and(|expiry| expiry > now)
    }

    /// Whether `owner` holds a live lease.
    pub fn is_held_by(&self, owner: &str, now: DateTime<Utc>) -> bool {
        self.lease_owner.as_deref() == Some(owner) && self.is_leased_at(now)
    }

    /// Non-terminal, not leased, and past any retry delay.
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        !self.provisioning_state.is_terminal()
            && !self.is_leased_at(now)
            && self.not_before.map_or(true, |not_before| not_before <= now)
    }

    pub fn clear_lease(&mut self) {
        self.lease_owner = None;
        self.lease_expiry = None;
    }
}
