//! ---
//! rp_section: "01-core-functionality"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Shared primitives and utilities for the backend runtime."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Environment variable consulted when `environment.location` is not configured.
pub const LOCATION_ENV: &str = "LOCATION";
/// Environment variable consulted when `environment.resource_group` is not configured.
pub const RESOURCE_GROUP_ENV: &str = "RESOURCEGROUP";

fn default_workers() -> usize {
    4
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_lease_ttl() -> Duration {
    Duration::from_secs(60)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_dequeue_count() -> u32 {
    5
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(300)
}

fn default_conflict_attempts() -> u32 {
    5
}

fn default_conflict_base_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

/// Primary configuration object for the backend daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "RP_CONFIG";

    /// Load configuration from disk, respecting the `RP_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Parse and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        if let Some(seed) = &self.store.seed_file {
            if !seed.is_file() {
                return Err(anyhow!(
                    "store seed_file {} does not exist or is not a file",
                    seed.display()
                ));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Deployment environment the backend runs in.
///
/// Both settings are required. Values missing from the file are taken from the
/// `LOCATION` and `RESOURCEGROUP` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub resource_group: Option<String>,
}

/// Environment settings after resolution against process variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    pub location: String,
    pub resource_group: String,
}

impl EnvironmentConfig {
    /// Resolve required settings against the process environment.
    pub fn resolve(&self) -> Result<ResolvedEnvironment> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve required settings using the supplied variable lookup.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<ResolvedEnvironment>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |configured: &Option<String>, key: &str| -> Result<String> {
            configured
                .clone()
                .or_else(|| lookup(key))
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| anyhow!("environment variable {:?} unset", key))
        };
        Ok(ResolvedEnvironment {
            location: pick(&self.location, LOCATION_ENV)?,
            resource_group: pick(&self.resource_group, RESOURCE_GROUP_ENV)?,
        })
    }
}

/// Worker loop and lease tuning.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_lease_ttl")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub lease_ttl: Duration,
    #[serde(default = "default_heartbeat_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_max_dequeue_count")]
    pub max_dequeue_count: u32,
    #[serde(default = "default_shutdown_grace")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub shutdown_grace: Duration,
    #[serde(default)]
    pub conflict_retry: ConflictRetryConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval: default_poll_interval(),
            lease_ttl: default_lease_ttl(),
            heartbeat_interval: default_heartbeat_interval(),
            max_dequeue_count: default_max_dequeue_count(),
            shutdown_grace: default_shutdown_grace(),
            conflict_retry: ConflictRetryConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("backend.workers must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("backend.poll_interval must be greater than zero"));
        }
        if self.lease_ttl.is_zero() {
            return Err(anyhow!("backend.lease_ttl must be greater than zero"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(anyhow!(
                "backend.heartbeat_interval must be greater than zero"
            ));
        }
        if self.heartbeat_interval >= self.lease_ttl {
            return Err(anyhow!(
                "backend.heartbeat_interval ({:?}) must be shorter than backend.lease_ttl ({:?})",
                self.heartbeat_interval,
                self.lease_ttl
            ));
        }
        if self.max_dequeue_count == 0 {
            return Err(anyhow!("backend.max_dequeue_count must be at least 1"));
        }
        if self.conflict_retry.max_attempts == 0 {
            return Err(anyhow!(
                "backend.conflict_retry.max_attempts must be at least 1"
            ));
        }
        Ok(())
    }
}

/// Bounded retry applied to writes rejected for a stale concurrency token.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRetryConfig {
    #[serde(default = "default_conflict_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_conflict_base_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
}

impl Default for ConflictRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_conflict_attempts(),
            base_delay: default_conflict_base_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON array of cluster documents loaded into the in-memory store at startup.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
