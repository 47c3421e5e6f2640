//! Logging setup: coloured stderr plus a JSON daily-rolling log file.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogConfig;

/// Installs the global subscriber.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as the host wants file logging. Calling this twice returns an error from
/// the second call.
pub fn init(config: &LogConfig) -> anyhow::Result<WorkerGuard> {
    let (log_dir, log_file_name) = split_log_path(&config.file_path);

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .try_init()?;

    Ok(file_guard)
}

/// Splits a log file path into its directory and file name, falling back to
/// `logs/` and `transit_track.log`.
fn split_log_path(path: &Path) -> (PathBuf, OsString) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let name = path
        .file_name()
        .unwrap_or(OsStr::new("transit_track.log"));
    (dir.to_path_buf(), name.to_os_string())
}
