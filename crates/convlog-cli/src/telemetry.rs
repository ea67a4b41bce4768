use anyhow::Context;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Name of the run-trace file for a process started at `at`.
pub fn run_log_name(at: DateTime<Local>) -> String {
    format!("convlog-{}.log", at.format("%Y%m%d-%H%M%S"))
}

/// Install the global subscriber: stderr plus one run-trace file per process
/// start under `log_dir`.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Keep the returned
/// guard alive for the life of the process, or buffered file output is lost.
pub fn init(log_dir: &Path) -> anyhow::Result<(WorkerGuard, PathBuf)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory '{}'", log_dir.display()))?;

    let file_name = run_log_name(Local::now());
    let appender = tracing_appender::rolling::never(log_dir, &file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    Ok((guard, log_dir.join(file_name)))
}
