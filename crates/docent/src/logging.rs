use chrono::Local;
use docent_core::utils::AppPaths;
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use tracing_appender::rolling;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Initialize tracing with a file logger under `~/.docent/logs`, one file per
/// run, named by start time. The filter comes from RUST_LOG.
///
/// Without a home directory, logs go to stderr instead. Returns the log file
/// path when one is in use.
pub fn init_tracing() -> Result<Option<PathBuf>> {
    let filter = EnvFilter::from_default_env();

    let Some(log_dir) = AppPaths::log_dir() else {
        let subscriber = tracing_subscriber::registry()
            .with(
                fmt::Layer::default()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true),
            )
            .with(filter);
        tracing::subscriber::set_global_default(subscriber)
            .wrap_err("Failed to set global default subscriber")?;

        tracing::debug!(
            target: "docent::logging",
            "Tracing initialized with stderr output. Filter configured via RUST_LOG env var."
        );
        return Ok(None);
    };

    std::fs::create_dir_all(&log_dir)
        .wrap_err_with(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_name = format!("{}.log", Local::now().format("%Y%m%d_%H%M%S"));
    let file_appender = rolling::never(&log_dir, &file_name);

    let subscriber = tracing_subscriber::registry()
        .with(
            fmt::Layer::new()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true),
        )
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)
        .wrap_err("Failed to set global default subscriber")?;

    let path = log_dir.join(file_name);
    tracing::debug!(
        target: "docent::logging",
        path = %path.display(),
        "Tracing initialized with file output. Filter configured via RUST_LOG env var."
    );
    Ok(Some(path))
}
