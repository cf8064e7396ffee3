//! Shared logging utilities for Vigil binaries.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "vigil=info,vigil_hub=info,vigil_sensor=info,vigil_bus=info";

/// Environment variable holding the log filter, `RUST_LOG` syntax.
pub const LOG_FILTER_ENV: &str = "VIGIL_LOG";

/// Logging configuration shared by Vigil binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a daily-rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_writer =
        tracing_appender::rolling::daily(log_dir, format!("{}.log", config.app_name));

    let file_filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let console_filter = if config.verbose {
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_env(LOG_FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// Get the Vigil home directory: ~/.vigil
pub fn vigil_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("VIGIL_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vigil")
}

/// Get the logs directory: ~/.vigil/logs
pub fn logs_dir() -> PathBuf {
    vigil_home().join("logs")
}

/// Get the data directory: ~/.vigil/data (event store, captures)
pub fn data_dir() -> PathBuf {
    vigil_home().join("data")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Ensure the data directory exists.
pub fn ensure_data_dir() -> Result<PathBuf> {
    let data = data_dir();
    fs::create_dir_all(&data)
        .with_context(|| format!("Failed to create data directory: {}", data.display()))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_home_respects_override() {
        // Serial by nature: env mutation. Tests in this module must not
        // assume a clean VIGIL_HOME.
        std::env::set_var("VIGIL_HOME", "/tmp/vigil-test-home");
        assert_eq!(vigil_home(), PathBuf::from("/tmp/vigil-test-home"));
        assert_eq!(logs_dir(), PathBuf::from("/tmp/vigil-test-home/logs"));
        assert_eq!(data_dir(), PathBuf::from("/tmp/vigil-test-home/data"));
        std::env::remove_var("VIGIL_HOME");
    }
}
