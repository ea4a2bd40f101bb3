use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DiagnosticsConfig;

pub const DEFAULT_LOG_FILTER: &str = "info,tracksplice_core=debug";

/// Holds the non-blocking file writer open; JSON logs stop flushing once
/// this is dropped.
pub struct TelemetryGuard {
    pub log_file: PathBuf,
    _file_guard: WorkerGuard,
}

pub fn init_tracing(log_dir: impl AsRef<Path>) -> anyhow::Result<TelemetryGuard> {
    init_tracing_with_config(log_dir, &DiagnosticsConfig::default())
}

pub fn init_tracing_with_config(
    log_dir: impl AsRef<Path>,
    config: &DiagnosticsConfig,
) -> anyhow::Result<TelemetryGuard> {
    let log_dir = log_dir.as_ref();
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.rust_log_filter).with_context(|| {
            format!("invalid diagnostics.rust_log_filter: {}", config.rust_log_filter)
        })?,
    };

    let file_name = trace_file_name(&config.trace_file_prefix, Utc::now());
    let log_file = log_dir.join(&file_name);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_current_span(true)
                .with_writer(file_writer),
        )
        .try_init();

    match installed {
        Ok(()) => info!(log_file = %log_file.display(), "tracing initialized"),
        Err(error) => debug!(%error, "keeping the already installed subscriber"),
    }

    Ok(TelemetryGuard {
        log_file,
        _file_guard: file_guard,
    })
}

fn trace_file_name(prefix: &str, started_at: DateTime<Utc>) -> String {
    format!("{prefix}-{}.log", started_at.format("%Y%m%d-%H%M%S"))
}
