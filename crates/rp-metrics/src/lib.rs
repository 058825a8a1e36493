//! ---
//! rp_section: "03-logging"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Metrics collection and export utilities."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub mod emitter;

pub use emitter::{EmittedMetric, MetricValue, MetricsEmitter, PrometheusEmitter, RecordingEmitter};

/// Shared registry type used across the backend.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address. Differs from the requested one when port 0 was asked for.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "rpd_starts_total",
            "Total number of times the backend daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "rpd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("rpd_build_info", "Build metadata for the running daemon binary"),
            &["version", "git_sha", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, git_sha: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, git_sha, profile])
            .set(1.0);
    }
}

/// Worker loop instrumentation.
#[derive(Clone, Debug)]
pub struct BackendMetrics {
    registry: SharedRegistry,
    dequeues: IntCounterVec,
    pipelines: IntCounterVec,
    pipeline_seconds: HistogramVec,
    busy_workers: IntGauge,
    leases_lost: IntCounter,
}

impl BackendMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let dequeues = IntCounterVec::new(
            Opts::new(
                "rp_backend_dequeues_total",
                "Dequeue attempts by outcome (claimed, empty, conflict, error)",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(dequeues.clone()))?;

        let pipelines = IntCounterVec::new(
            Opts::new(
                "rp_backend_pipelines_total",
                "Finished pipelines by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(pipelines.clone()))?;

        let buckets = prometheus::exponential_buckets(0.5, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let pipeline_seconds = HistogramVec::new(
            HistogramOpts::new(
                "rp_backend_pipeline_duration_seconds",
                "Wall-clock duration of pipeline runs",
            )
            .buckets(buckets),
            &["operation"],
        )?;
        registry.register(Box::new(pipeline_seconds.clone()))?;

        let busy_workers = IntGauge::with_opts(Opts::new(
            "rp_backend_busy_workers",
            "Workers currently running a pipeline",
        ))?;
        registry.register(Box::new(busy_workers.clone()))?;

        let leases_lost = IntCounter::with_opts(Opts::new(
            "rp_backend_leases_lost_total",
            "Pipelines cancelled because the lease could not be renewed",
        ))?;
        registry.register(Box::new(leases_lost.clone()))?;

        Ok(Self {
            registry,
            dequeues,
            pipelines,
            pipeline_seconds,
            busy_workers,
            leases_lost,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_dequeue(&self, outcome: &str) {
        self.dequeues.with_label_values(&[outcome]).inc();
    }

    pub fn record_pipeline(&self, operation: &str, outcome: &str, seconds: f64) {
        self.pipelines
            .with_label_values(&[operation, outcome])
            .inc();
        self.pipeline_seconds
            .with_label_values(&[operation])
            .observe(seconds);
    }

    pub fn worker_busy(&self) {
        self.busy_workers.inc();
    }

    pub fn worker_idle(&self) {
        self.busy_workers.dec();
    }

    pub fn record_lease_lost(&self) {
        self.leases_lost.inc();
    }

    pub fn dequeue_count(&self, outcome: &str) -> u64 {
        self.dequeues.with_label_values(&[outcome]).get()
    }

    pub fn pipeline_count(&self, operation: &str, outcome: &str) -> u64 {
        self.pipelines
            .with_label_values(&[operation, outcome])
            .get()
    }

    pub fn busy_workers(&self) -> i64 {
        self.busy_workers.get()
    }
}

pub use prometheus;
