use std::{ffi::OsString, path::Path};

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Stderr gets `stderr_level` (overridable through `RUST_LOG`); the log
/// file always captures `file_level`. The returned guard must stay alive
/// for the process lifetime or buffered file output is lost.
pub fn init_logging(
    stderr_level: LevelFilter,
    log_file: &Path,
    file_level: LevelFilter,
) -> Result<WorkerGuard> {
    let directory = log_file.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory).with_context(|| {
        format!(
            "Failed to create log directory {directory}",
            directory = directory.display()
        )
    })?;
    let file_name = log_file
        .file_name()
        .map_or_else(|| OsString::from("i2v.log"), ToOwned::to_owned);

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let stderr_filter = EnvFilter::builder()
        .with_default_directive(stderr_level.into())
        .from_env_lossy();
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(file_level);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}
