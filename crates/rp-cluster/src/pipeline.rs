//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Pipeline selection per lifecycle operation."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use rp_store::Operation;

use crate::manager::ClusterManager;
use crate::steps::Step;

/// Chooses the ordered steps to run for an operation.
pub trait PipelineProvider: Send + Sync {
    fn pipeline(&self, operation: Operation, manager: &Arc<ClusterManager>) -> Vec<Step>;
}

impl<F> PipelineProvider for F
where
    F: Fn(Operation, &Arc<ClusterManager>) -> Vec<Step> + Send + Sync,
{
    fn pipeline(&self, operation: Operation, manager: &Arc<ClusterManager>) -> Vec<Step> {
        self(operation, manager)
    }
}

/// Built-in pipelines. Cloud resource steps are contributed by callers with
/// their own [`PipelineProvider`].
#[derive(Debug, Clone)]
pub struct StandardPipelines {
    pub api_poll_interval: Duration,
    pub api_timeout: Duration,
}

impl Default for StandardPipelines {
    fn default() -> Self {
        Self {
            api_poll_interval: Duration::from_secs(10),
            api_timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl PipelineProvider for StandardPipelines {
    fn pipeline(&self, operation: Operation, manager: &Arc<ClusterManager>) -> Vec<Step> {
        let mut steps = vec![manager.update_provisioned_by_step()];
        // without a kubeconfig there is no API server to wait for
        let reachable = manager.document().cluster.admin_kubeconfig.is_some();
        match operation {
            Operation::Create | Operation::Update if reachable => {
                steps.push(manager.wait_for_api_server_step(self.api_poll_interval, self.api_timeout));
            }
            Operation::Create | Operation::Update | Operation::Delete => {}
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::StaticInspector;
    use rp_store::{
        ClusterDocument, ClusterProperties, InMemoryDocumentStore, LeaseConfig, LeaseQueue,
        ProvisioningState,
    };

    fn manager(kubeconfig: Option<&str>) -> Arc<ClusterManager> {
        let document = ClusterDocument::new(
            "cluster",
            ProvisioningState::Creating,
            ClusterProperties {
                admin_kubeconfig: kubeconfig.map(str::to_string),
                ..ClusterProperties::default()
            },
        );
        let queue = Arc::new(LeaseQueue::new(
            Arc::new(InMemoryDocumentStore::new()),
            "worker",
            LeaseConfig::default(),
        ));
        Arc::new(ClusterManager::new(
            document,
            queue,
            Arc::new(StaticInspector::new()),
            "stamp",
        ))
    }

    fn names(steps: &[Step]) -> Vec<String> {
        steps.iter().map(Step::to_string).collect()
    }

    #[test]
    fn standard_pipelines_per_operation() {
        let pipelines = StandardPipelines::default();
        let reachable = manager(Some("apiVersion: v1"));
        assert_eq!(
            names(&pipelines.pipeline(Operation::Create, &reachable)),
            vec!["Action update_provisioned_by", "Condition wait_for_api_server"]
        );
        assert_eq!(
            names(&pipelines.pipeline(Operation::Delete, &reachable)),
            vec!["Action update_provisioned_by"]
        );
        assert_eq!(
            names(&pipelines.pipeline(Operation::Update, &manager(None))),
            vec!["Action update_provisioned_by"]
        );
    }

    #[test]
    fn closures_are_providers() {
        let provider = |operation: Operation, _: &Arc<ClusterManager>| {
            vec![Step::action(operation.as_str(), |_| async { Ok(()) })]
        };
        let steps = provider.pipeline(Operation::Delete, &manager(None));
        assert_eq!(names(&steps), vec!["Action delete"]);
    }
}
