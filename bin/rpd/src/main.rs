//! ---
//! rp_section: "01-core-functionality"
//! rp_subsection: "binary"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Binary entrypoint for the backend daemon."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use rp_backend::Backend;
use rp_cluster::{KubeInspectorFactory, StandardPipelines};
use rp_common::config::{AppConfig, ResolvedEnvironment};
use rp_common::logging::init_tracing;
use rp_common::version::{build_stamp, VersionInfo};
use rp_metrics::{
    new_registry, spawn_http_server, BackendMetrics, DaemonMetrics, MetricsServer,
    PrometheusEmitter, SharedRegistry,
};
use rp_store::{ConflictRetry, DocumentStore, InMemoryDocumentStore, LeaseConfig, LeaseQueue};
use tokio::signal;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = env!("CARGO_PKG_VERSION"),
    about = "Cluster provisioning backend daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the backend workers")]
    Run,
    #[command(about = "Load and validate configuration, then exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/rpd.toml"));
    candidates.push(PathBuf::from("configs/rpd.example.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let config = loaded_config.config;
    let config_path = loaded_config.source;
    let load_duration = load_started.elapsed();
    let environment = config
        .environment
        .resolve()
        .context("backend environment is incomplete")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            render_config_summary(&config, &config_path, &environment);
        }
        Commands::Run => {
            let metrics_registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(metrics_registry.clone())?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(&version.semver, &version.git_sha, &version.profile);

            init_tracing("rpd", &config.logging)?;
            info!(
                version = %version.cli_string(),
                config_path = %config_path.display(),
                location = %environment.location,
                resource_group = %environment.resource_group,
                "configuration loaded"
            );
            run_daemon(config, metrics_registry).await?;
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, metrics_registry: SharedRegistry) -> Result<()> {
    let metrics_settings = config.metrics.clone();
    let backend_settings = config.backend.clone();

    let metrics_server: Option<MetricsServer> = if metrics_settings.enabled {
        let server = spawn_http_server(metrics_registry.clone(), metrics_settings.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let store: Arc<dyn DocumentStore> = match &config.store.seed_file {
        Some(seed) => Arc::new(
            InMemoryDocumentStore::from_seed_file(seed)
                .with_context(|| format!("failed to seed store from {}", seed.display()))?,
        ),
        None => Arc::new(InMemoryDocumentStore::new()),
    };

    let worker_id = Uuid::new_v4().to_string();
    let retry = ConflictRetry::new(
        backend_settings.conflict_retry.max_attempts,
        backend_settings.conflict_retry.base_delay,
    );
    let queue = Arc::new(
        LeaseQueue::new(store, worker_id.clone(), LeaseConfig::with_ttl(backend_settings.lease_ttl))
            .with_retry(retry),
    );

    let mut backend = Backend::new(
        queue,
        Arc::new(StandardPipelines::default()),
        Arc::new(KubeInspectorFactory),
        backend_settings.clone(),
        build_stamp(),
    );
    if metrics_settings.enabled {
        backend = backend
            .with_metrics(BackendMetrics::new(metrics_registry.clone())?)
            .with_emitter(Arc::new(PrometheusEmitter::new(metrics_registry)));
    }

    let handle = backend.start();
    info!(
        worker_id = %worker_id,
        workers = backend_settings.workers,
        "daemon running; waiting for termination signal"
    );
    wait_for_termination().await?;

    info!(grace = ?backend_settings.shutdown_grace, "stopping workers");
    if !handle.shutdown(backend_settings.shutdown_grace).await {
        warn!("shutdown grace elapsed; in-flight runs were aborted");
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    info!("daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() -> Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            info!("ctrl-c received; shutting down");
        }
        _ = terminate.recv() => {
            info!("SIGTERM received; shutting down");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination() -> Result<()> {
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    Ok(())
}

fn render_config_summary(config: &AppConfig, path: &Path, environment: &ResolvedEnvironment) {
    println!(
        "Config: {}\nLocation: {}\nResource group: {}\nWorkers: {}\nLease TTL: {:?}\nMetrics: {}",
        path.display(),
        environment.location,
        environment.resource_group,
        config.backend.workers,
        config.backend.lease_ttl,
        if config.metrics.enabled {
            config.metrics.listen.to_string()
        } else {
            "disabled".to_owned()
        }
    );
}
