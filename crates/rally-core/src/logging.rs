//! Tracing subscriber setup.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingConfig, paths};

/// Env var overriding `logging.filter`.
pub const LOG_ENV: &str = "RALLY_LOG";

/// Installs the global subscriber.
///
/// Logs go to a daily rolling file under `$RALLY_HOME/logs` when enabled,
/// otherwise (or if the directory cannot be used) to stderr. Keep the returned
/// guard alive for the lifetime of the process so buffered lines are flushed.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.file {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("rally")
            .filename_suffix("log")
            .build(paths::logs_dir());
        match appender {
            Ok(appender) => {
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .try_init();
                return Some(guard);
            }
            Err(err) => eprintln!("Warning: file logging disabled: {err}"),
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    None
}
