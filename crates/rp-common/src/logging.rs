//! ---
//! rp_section: "01-core-functionality"
//! rp_subsection: "module"
//! rp_type: "source"
//! rp_scope: "code"
//! rp_description: "Tracing subscriber setup for the backend daemon."
//! rp_version: "v0.0.0-prealpha"
//! rp_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Registry;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "RP_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Flushes buffered output when the process exits.
struct WriterGuards {
    _stdout: WorkerGuard,
    _file: WorkerGuard,
}

static GUARDS: OnceCell<WriterGuards> = OnceCell::new();

/// Available log formats for the daemon.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the global subscriber: stdout in the configured format plus a
/// daily rolling JSON file under `config.directory`.
///
/// The filter comes from `RP_LOG`, then `RUST_LOG`, then `info`.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);

    let (stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let (file, file_guard) =
        tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
    let _ = GUARDS.set(WriterGuards {
        _stdout: stdout_guard,
        _file: file_guard,
    });

    let layers: Vec<BoxedLayer> = vec![stdout_layer(config.format, stdout), file_layer(file)];
    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter())
        .try_init()
        .ok();

    info!(service = %service_name, log_dir = %config.directory.display(), format = ?config.format, "tracing initialised");
    Ok(())
}

fn stdout_layer(format: LogFormat, writer: NonBlocking) -> BoxedLayer {
    let layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer);
    match format {
        LogFormat::StructuredJson => layer.with_target(false).json().boxed(),
        LogFormat::Pretty => layer.with_target(true).boxed(),
    }
}

fn file_layer(writer: NonBlocking) -> BoxedLayer {
    fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .json()
        .with_writer(writer)
        .boxed()
}

fn env_filter() -> EnvFilter {
    let directive = filter_directive(|name| std::env::var(name).ok());
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("ignoring log filter {directive:?} ({err}); using {DEFAULT_DIRECTIVE}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    })
}

fn filter_directive<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .find_map(|name| lookup(name).filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_owned())
}
