//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Diagnostics probes against a live cluster API."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DynamicObject, GroupVersionKind, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use rp_store::ClusterDocument;
use tracing::debug;

use crate::diagnostics::{
    ClusterInspector, ClusterOperatorStatus, ClusterVersionStatus, DiagnosticsError,
    IngressControllerStatus, InspectorFactory, NodeStatus, StatusCondition, UnreachableInspector,
};

const CLUSTER_VERSION_NAME: &str = "version";
const INGRESS_OPERATOR_NAMESPACE: &str = "openshift-ingress-operator";

fn config_resource(kind: &str) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk("config.openshift.io", "v1", kind))
}

fn ingress_controller_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "operator.openshift.io",
        "v1",
        "IngressController",
    ))
}

fn api_error(err: kube::Error) -> DiagnosticsError {
    DiagnosticsError::Api(err.to_string())
}

fn conditions_of(object: &DynamicObject) -> Vec<StatusCondition> {
    object
        .data
        .pointer("/status/conditions")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

fn name_of(object: &DynamicObject) -> String {
    object.metadata.name.clone().unwrap_or_default()
}

/// Inspector talking to the cluster's API server with its admin kubeconfig.
#[derive(Clone)]
pub struct KubeInspector {
    client: Client,
}

impl KubeInspector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_kubeconfig_yaml(yaml: &str) -> Result<Self, DiagnosticsError> {
        let kubeconfig = Kubeconfig::from_yaml(yaml)
            .map_err(|e| DiagnosticsError::Unreachable(format!("invalid kubeconfig: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| DiagnosticsError::Unreachable(format!("invalid kubeconfig: {e}")))?;
        let client = Client::try_from(config)
            .map_err(|e| DiagnosticsError::Unreachable(format!("failed to create client: {e}")))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterInspector for KubeInspector {
    async fn cluster_version(&self) -> Result<ClusterVersionStatus, DiagnosticsError> {
        let resource = config_resource("ClusterVersion");
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let object = api
            .get_opt(CLUSTER_VERSION_NAME)
            .await
            .map_err(api_error)?
            .ok_or_else(|| DiagnosticsError::NotFound {
                resource: format!("{}.{}", resource.plural, resource.group),
                name: CLUSTER_VERSION_NAME.into(),
            })?;
        Ok(ClusterVersionStatus {
            name: name_of(&object),
            desired_version: object
                .data
                .pointer("/status/desired/version")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            conditions: conditions_of(&object),
        })
    }

    async fn nodes(&self) -> Result<Vec<NodeStatus>, DiagnosticsError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(api_error)?;
        Ok(nodes
            .items
            .into_iter()
            .map(|node| NodeStatus {
                name: node.metadata.name.unwrap_or_default(),
                conditions: node
                    .status
                    .and_then(|status| status.conditions)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| StatusCondition {
                        kind: c.type_,
                        status: c.status,
                        reason: c.reason,
                        message: c.message,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn cluster_operators(&self) -> Result<Vec<ClusterOperatorStatus>, DiagnosticsError> {
        let resource = config_resource("ClusterOperator");
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let operators = api
            .list(&ListParams::default())
            .await
            .map_err(api_error)?;
        Ok(operators
            .items
            .iter()
            .map(|object| ClusterOperatorStatus {
                name: name_of(object),
                conditions: conditions_of(object),
            })
            .collect())
    }

    async fn ingress_controllers(&self) -> Result<Vec<IngressControllerStatus>, DiagnosticsError> {
        let resource = ingress_controller_resource();
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), INGRESS_OPERATOR_NAMESPACE, &resource);
        let controllers = api
            .list(&ListParams::default())
            .await
            .map_err(api_error)?;
        Ok(controllers
            .items
            .iter()
            .map(|object| IngressControllerStatus {
                name: name_of(object),
                namespace: object
                    .metadata
                    .namespace
                    .clone()
                    .unwrap_or_else(|| INGRESS_OPERATOR_NAMESPACE.to_string()),
                conditions: conditions_of(object),
            })
            .collect())
    }
}

/// Builds a [`KubeInspector`] from the document's admin kubeconfig, or an
/// [`UnreachableInspector`] when there is none or it is unusable.
#[derive(Debug, Clone, Default)]
pub struct KubeInspectorFactory;

#[async_trait]
impl InspectorFactory for KubeInspectorFactory {
    async fn inspector_for(&self, document: &ClusterDocument) -> Arc<dyn ClusterInspector> {
        let Some(kubeconfig) = document.cluster.admin_kubeconfig.as_deref() else {
            return Arc::new(UnreachableInspector::new("cluster has no admin kubeconfig"));
        };
        match KubeInspector::from_kubeconfig_yaml(kubeconfig).await {
            Ok(inspector) => Arc::new(inspector),
            Err(err) => {
                debug!(key = %document.key, error = %err, "falling back to unreachable inspector");
                Arc::new(UnreachableInspector::new(err.to_string()))
            }
        }
    }
}
