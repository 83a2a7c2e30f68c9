//! Logging configuration for Redfire DTMF

use std::path::Path;

use tracing::{info, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};
use crate::Result;

/// Setup logging based on configuration.
///
/// The returned guard flushes the log file on drop and must be held for the
/// lifetime of the process.
pub fn setup_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = match &config.file {
        Some(file_path) => {
            let file_path = Path::new(file_path);
            let directory = file_path.parent()
                .ok_or_else(|| crate::Error::parse("Invalid log file path"))?;
            let filename = file_path.file_stem()
                .and_then(|name| name.to_str())
                .ok_or_else(|| crate::Error::parse("Invalid log filename"))?;

            let file_appender = rolling::RollingFileAppender::builder()
                .rotation(rolling::Rotation::DAILY)
                .filename_prefix(filename)
                .filename_suffix("log")
                .build(directory)
                .map_err(|e| crate::Error::internal(format!("Failed to create file appender: {}", e)))?;

            let (file_writer, file_guard) = non_blocking(file_appender);

            let file_layer = match config.format {
                LogFormat::Json => fmt::layer()
                    .json()
                    .with_writer(file_writer)
                    .boxed(),
                LogFormat::Compact => fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .boxed(),
                LogFormat::Full => fmt::layer()
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .boxed(),
            };

            registry
                .with(file_layer)
                .with(console_layer(&config.format))
                .try_init()
                .map_err(|e| crate::Error::internal(format!("Failed to install subscriber: {}", e)))?;

            Some(file_guard)
        }
        None => {
            registry
                .with(console_layer(&config.format))
                .try_init()
                .map_err(|e| crate::Error::internal(format!("Failed to install subscriber: {}", e)))?;

            None
        }
    };

    info!("Logging initialized with level: {}", config.level);
    Ok(guard)
}

fn console_layer<S>(format: &LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
        LogFormat::Full => fmt::layer().boxed(),
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(crate::Error::parse("Invalid log level")),
    }
}
