//! ---
//! rp_section: "01-core-functionality"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Shared primitives and utilities for the backend runtime."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
//! Core shared primitives for the RP backend workspace.
//! This crate exposes configuration loading, tracing initialisation, and
//! build metadata consumed across the workspace.

pub mod config;
pub mod logging;
pub mod version;

pub use config::{
    AppConfig, BackendConfig, ConflictRetryConfig, EnvironmentConfig, LoadedAppConfig,
    LoggingConfig, MetricsConfig, ResolvedEnvironment, StoreConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use version::{build_stamp, VersionInfo};
