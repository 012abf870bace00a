//! Logging setup.
//!
//! stderr always receives events at the `--verbosity` level (or whatever
//! `RUST_LOG` says). With a log directory, `info.log` additionally keeps
//! INFO and above and `error.log` keeps ERROR only, independent of verbosity.

use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const INFO_LOG: &str = "info.log";
pub const ERROR_LOG: &str = "error.log";

/// Flushes the file writers when dropped; keep it alive until exit.
#[must_use = "dropping the guard stops the log file writers"]
pub struct LogGuard {
    _workers: Vec<WorkerGuard>,
}

/// 0 error, 1 warn, 2 info, 3+ debug
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

fn appender(dir: &Path, name: &str) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
}

fn open_log_files(dir: &Path) -> anyhow::Result<(RollingFileAppender, RollingFileAppender)> {
    fs::create_dir_all(dir)?;
    Ok((appender(dir, INFO_LOG)?, appender(dir, ERROR_LOG)?))
}

/// Install the global subscriber.
///
/// A log directory that cannot be created or written is reported as a
/// warning on stderr; logging continues without the file layers.
pub fn init(verbosity: u8, log_dir: Option<&Path>) -> anyhow::Result<LogGuard> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_for(verbosity).into())
        .from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(env_filter);

    let (files, file_error) = match log_dir.map(open_log_files) {
        Some(Ok(files)) => (Some(files), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let mut workers = Vec::new();
    let (info_layer, error_layer) = match files {
        Some((info, error)) => {
            let (info, info_guard) = tracing_appender::non_blocking(info);
            let (error, error_guard) = tracing_appender::non_blocking(error);
            workers.push(info_guard);
            workers.push(error_guard);
            (
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(info)
                        .with_filter(LevelFilter::INFO),
                ),
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(error)
                        .with_filter(LevelFilter::ERROR),
                ),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(info_layer)
        .with(error_layer)
        .try_init()?;

    if let (Some(dir), Some(e)) = (log_dir, file_error) {
        warn!(dir = %dir.display(), error = %e, "cannot write log files, logging to stderr only");
    }
    Ok(LogGuard { _workers: workers })
}
