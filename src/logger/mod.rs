//! General purpose logging utility for Save Warden
//!
//! Call sites tag every message with the component that produced it:
//! - Console output plus a daily rolling log file
//! - Multiple log levels (INFO, WARN, ERROR, DEBUG)
//! - Simple API for easy integration
//!
//! Messages are emitted as `tracing` events, so nothing is written until
//! [`initialize_logging`] has installed a subscriber.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable that overrides the configured level filter.
pub const LOG_FILTER_ENV: &str = "SAVE_WARDEN_LOG";

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_directory: PathBuf,
    pub file_prefix: String,
    pub level: String,
    pub enable_console_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        // Use same app data directory as database files for consistency
        Self {
            log_directory: crate::config::AppPaths::default_app_data_dir().join("logs"),
            file_prefix: "save-warden.log".to_string(),
            level: "info".to_string(),
            enable_console_output: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Initialize the logging system with default configuration
pub fn initialize_logging() -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    initialize_logging_with_config(LogConfig::default())
}

/// Initialize the logging system with custom configuration.
///
/// The returned guard flushes the file writer when dropped and must be kept
/// alive for as long as the process logs.
pub fn initialize_logging_with_config(config: LogConfig) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.log_directory)?;

    let filter = std::env::var(LOG_FILTER_ENV).unwrap_or_else(|_| config.level.clone());
    let filter_layer = EnvFilter::try_new(filter)?;

    let file_appender = tracing_appender::rolling::daily(&config.log_directory, &config.file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = config.enable_console_output.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(console_layer)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .try_init()?;

    info("LOGGER", "Logging system initialized", Some(&config.log_directory.display().to_string()));

    Ok(guard)
}

/// Emit one event at the given level.
pub fn log(level: LogLevel, component: &str, message: &str, details: Option<&str>) {
    let details = details.unwrap_or("");
    match level {
        LogLevel::Debug => tracing::debug!(component, details, "{}", message),
        LogLevel::Info => tracing::info!(component, details, "{}", message),
        LogLevel::Warn => tracing::warn!(component, details, "{}", message),
        LogLevel::Error => tracing::error!(component, details, "{}", message),
    }
}

/// Log a debug message
pub fn debug(component: &str, message: &str, details: Option<&str>) {
    log(LogLevel::Debug, component, message, details);
}

/// Log an info message
pub fn info(component: &str, message: &str, details: Option<&str>) {
    log(LogLevel::Info, component, message, details);
}

/// Log a warning message
pub fn warn(component: &str, message: &str, details: Option<&str>) {
    log(LogLevel::Warn, component, message, details);
}

/// Log an error message
pub fn error(component: &str, message: &str, details: Option<&str>) {
    log(LogLevel::Error, component, message, details);
}

/// Database-specific logging functions
pub mod database {
    use super::*;

    /// Log database connection success
    pub fn connection_success(db_path: &Path) {
        info("DATABASE", &format!("Database connection established to {}", db_path.display()), None);
    }

    /// Log database connection error
    pub fn connection_error(db_path: &Path, error_msg: &str) {
        error(
            "DATABASE",
            &format!("Database connection failed to {}", db_path.display()),
            Some(error_msg),
        );
    }

    /// Log table creation operation
    pub fn table_creation(table_name: &str, success: bool) {
        if success {
            info("DATABASE", &format!("Table '{}' created successfully", table_name), None);
        } else {
            error("DATABASE", &format!("Failed to create table '{}'", table_name), None);
        }
    }

    /// Log database migration operation
    pub fn migration(from_version: u32, to_version: u32, success: bool) {
        if success {
            info(
                "DATABASE",
                &format!("Database migration completed: v{} -> v{}", from_version, to_version),
                None,
            );
        } else {
            error(
                "DATABASE",
                &format!("Database migration failed: v{} -> v{}", from_version, to_version),
                None,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert_eq!(LogLevel::Debug.as_str(), "DEBUG");
        assert_eq!(LogLevel::Info.as_str(), "INFO");
        assert_eq!(LogLevel::Warn.as_str(), "WARN");
        assert_eq!(LogLevel::Error.as_str(), "ERROR");
    }

    #[test]
    fn test_logging_without_subscriber_is_silent() {
        // No subscriber installed in unit tests; these must not panic.
        info("TEST", "Test message", Some("Additional details"));
        database::migration(1, 2, true);
        database::table_creation("backups", false);
    }
}
