//! Tracing subscriber bootstrap.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{GatewayError, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. When a log directory is
/// configured, output goes to a daily-rolling file and the returned guard
/// must be held until shutdown so buffered lines are flushed.
///
/// # Errors
///
/// Returns [`GatewayError::Config`] if the filter directive is invalid or a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| GatewayError::Config(format!("invalid log level: {e}")))?,
    };

    match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "voxgate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .map_err(|e| GatewayError::Config(format!("logging already initialised: {e}")))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| GatewayError::Config(format!("logging already initialised: {e}")))?;
            Ok(None)
        }
    }
}
