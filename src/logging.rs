//! Logging bootstrap (§10.3): structured `tracing` output, filterable via
//! `RUST_LOG`, optionally duplicated to a rolling file under
//! [`Config::log_dir`](crate::config::Config).
//!
//! Returns the [`tracing_appender::non_blocking::WorkerGuard`] the caller
//! must hold for the process lifetime — dropping it early truncates the
//! file writer's in-flight buffer.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;

/// Installs the global subscriber. `verbose` lowers the default filter from
/// `info` to `debug` when `RUST_LOG` isn't set; an explicit `RUST_LOG`
/// always wins.
pub fn init(config: &Config) -> anyhow::Result<WorkerGuard> {
    let default_level = if config.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    std::fs::create_dir_all(&config.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "leadforge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(guard)
}
