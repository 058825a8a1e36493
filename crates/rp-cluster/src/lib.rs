//! ---
//! rp_section: "04-orchestration"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Cluster lifecycle pipelines and their execution."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Step pipelines for cluster lifecycle operations.
//!
//! A [`ClusterManager`] binds one leased document to its store, inspector and
//! metrics sink; a [`PipelineProvider`] picks the steps; the [`StepRunner`]
//! executes them fail-fast.

pub mod diagnostics;
pub mod kube_inspector;
pub mod manager;
pub mod pipeline;
pub mod runner;
pub mod steps;

pub use diagnostics::{
    collect as collect_diagnostics, ClusterInspector, DiagnosticsError, DiagnosticsSnapshot,
    FixedInspectorFactory, InspectorFactory, StaticInspector, UnreachableInspector,
};
pub use kube_inspector::{KubeInspector, KubeInspectorFactory};
pub use manager::ClusterManager;
pub use pipeline::{PipelineProvider, StandardPipelines};
pub use runner::{InstallationRecord, RunState, StepError, StepRunner, INSTALL_TIME_TOPIC};
pub use steps::{ConditionError, Step, StepCancelled};
