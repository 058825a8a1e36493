//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Best-effort health snapshot of a target cluster."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Diagnostics gathered when a pipeline fails.
//!
//! Four read-only probes run concurrently against the target cluster. Each one
//! either yields data or an absent marker; a failing probe is logged and never
//! affects the others or the pipeline's error. Results are logged after all
//! probes finish, in a fixed order, as `<probe>: <pretty json>` or
//! `<probe>: null`.

use std::sync::Arc;

use async_trait::async_trait;
use rp_logging::{rp_error, rp_info, LogContext};
use rp_store::ClusterDocument;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Probe names, in logging order.
pub const CLUSTER_VERSION_PROBE: &str = "cluster_version";
pub const NODES_PROBE: &str = "nodes";
pub const CLUSTER_OPERATORS_PROBE: &str = "cluster_operators";
pub const INGRESS_CONTROLLERS_PROBE: &str = "ingress_controllers";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiagnosticsError {
    /// Mirrors the API server's wording, e.g. `clusterversions.config.openshift.io "version" not found`.
    #[error("{resource} {name:?} not found")]
    NotFound { resource: String, name: String },
    #[error("cluster unreachable: {0}")]
    Unreachable(String),
    #[error("api request failed: {0}")]
    Api(String),
}

/// Status condition as reported by the API server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusCondition {
    pub fn new(kind: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            status: status.into(),
            reason: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_version: Option<String>,
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOperatorStatus {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressControllerStatus {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

/// Read-only view of a target cluster's control surface.
#[async_trait]
pub trait ClusterInspector: Send + Sync {
    async fn cluster_version(&self) -> Result<ClusterVersionStatus, DiagnosticsError>;
    async fn nodes(&self) -> Result<Vec<NodeStatus>, DiagnosticsError>;
    async fn cluster_operators(&self) -> Result<Vec<ClusterOperatorStatus>, DiagnosticsError>;
    async fn ingress_controllers(&self) -> Result<Vec<IngressControllerStatus>, DiagnosticsError>;
}

/// Builds the inspector for a claimed document.
#[async_trait]
pub trait InspectorFactory: Send + Sync {
    async fn inspector_for(&self, document: &ClusterDocument) -> Arc<dyn ClusterInspector>;
}

/// Whatever the probes returned; `None` marks an absent result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub cluster_version: Option<ClusterVersionStatus>,
    pub nodes: Option<Vec<NodeStatus>>,
    pub cluster_operators: Option<Vec<ClusterOperatorStatus>>,
    pub ingress_controllers: Option<Vec<IngressControllerStatus>>,
}

/// Run the four probes concurrently and log each result.
pub async fn collect(inspector: &dyn ClusterInspector, ctx: &LogContext<'_>) -> DiagnosticsSnapshot {
    let (cluster_version, nodes, cluster_operators, ingress_controllers) = futures::join!(
        inspector.cluster_version(),
        inspector.nodes(),
        inspector.cluster_operators(),
        inspector.ingress_controllers(),
    );

    DiagnosticsSnapshot {
        cluster_version: log_probe(ctx, CLUSTER_VERSION_PROBE, cluster_version.map(Some)),
        nodes: log_probe(ctx, NODES_PROBE, non_empty(nodes)),
        cluster_operators: log_probe(
            ctx,
            CLUSTER_OPERATORS_PROBE,
            non_empty(cluster_operators),
        ),
        ingress_controllers: log_probe(
            ctx,
            INGRESS_CONTROLLERS_PROBE,
            non_empty(ingress_controllers),
        ),
    }
}

// An empty list carries no information and is logged as null.
fn non_empty<T>(
    result: Result<Vec<T>, DiagnosticsError>,
) -> Result<Option<Vec<T>>, DiagnosticsError> {
    result.map(|items| if items.is_empty() { None } else { Some(items) })
}

fn log_probe<T: Serialize>(
    ctx: &LogContext<'_>,
    probe: &str,
    result: Result<Option<T>, DiagnosticsError>,
) -> Option<T> {
    let value = match result {
        Ok(value) => value,
        Err(err) => {
            rp_error!(context = *ctx, "{}", err);
            None
        }
    };
    let Some(value) = value else {
        rp_info!(context = *ctx, "{}: null", probe);
        return None;
    };
    match serde_json::to_string_pretty(&value) {
        Ok(json) => {
            rp_info!(context = *ctx, "{}: {}", probe, json);
            Some(value)
        }
        Err(err) => {
            rp_error!(context = *ctx, "{}: failed to encode result: {}", probe, err);
            rp_info!(context = *ctx, "{}: null", probe);
            None
        }
    }
}

/// Inspector returning fixed data. A missing cluster version is reported the
/// way the API server reports it.
#[derive(Debug, Clone, Default)]
pub struct StaticInspector {
    cluster_version: Option<ClusterVersionStatus>,
    nodes: Vec<NodeStatus>,
    cluster_operators: Vec<ClusterOperatorStatus>,
    ingress_controllers: Vec<IngressControllerStatus>,
}

impl StaticInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cluster_version(mut self, version: ClusterVersionStatus) -> Self {
        self.cluster_version = Some(version);
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeStatus>) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_cluster_operators(mut self, operators: Vec<ClusterOperatorStatus>) -> Self {
        self.cluster_operators = operators;
        self
    }

    pub fn with_ingress_controllers(mut self, controllers: Vec<IngressControllerStatus>) -> Self {
        self.ingress_controllers = controllers;
        self
    }
}

#[async_trait]
impl ClusterInspector for StaticInspector {
    async fn cluster_version(&self) -> Result<ClusterVersionStatus, DiagnosticsError> {
        self.cluster_version
            .clone()
            .ok_or_else(|| DiagnosticsError::NotFound {
                resource: "clusterversions.config.openshift.io".into(),
                name: "version".into(),
            })
    }

    async fn nodes(&self) -> Result<Vec<NodeStatus>, DiagnosticsError> {
        Ok(self.nodes.clone())
    }

    async fn cluster_operators(&self) -> Result<Vec<ClusterOperatorStatus>, DiagnosticsError> {
        Ok(self.cluster_operators.clone())
    }

    async fn ingress_controllers(&self) -> Result<Vec<IngressControllerStatus>, DiagnosticsError> {
        Ok(self.ingress_controllers.clone())
    }
}

/// Inspector for clusters that cannot be reached; every probe fails.
#[derive(Debug, Clone)]
pub struct UnreachableInspector {
    reason: String,
}

impl UnreachableInspector {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> Result<T, DiagnosticsError> {
        Err(DiagnosticsError::Unreachable(self.reason.clone()))
    }
}

#[async_trait]
impl ClusterInspector for UnreachableInspector {
    async fn cluster_version(&self) -> Result<ClusterVersionStatus, DiagnosticsError> {
        self.fail()
    }

    async fn nodes(&self) -> Result<Vec<NodeStatus>, DiagnosticsError> {
        self.fail()
    }

    async fn cluster_operators(&self) -> Result<Vec<ClusterOperatorStatus>, DiagnosticsError> {
        self.fail()
    }

    async fn ingress_controllers(&self) -> Result<Vec<IngressControllerStatus>, DiagnosticsError> {
        self.fail()
    }
}

/// Factory handing out the same inspector for every document.
#[derive(Clone)]
pub struct FixedInspectorFactory {
    inspector: Arc<dyn ClusterInspector>,
}

impl FixedInspectorFactory {
    pub fn new(inspector: Arc<dyn ClusterInspector>) -> Self {
        Self { inspector }
    }
}

#[async_trait]
impl InspectorFactory for FixedInspectorFactory {
    async fn inspector_for(&self, _document: &ClusterDocument) -> Arc<dyn ClusterInspector> {
        self.inspector.clone()
    }
}
