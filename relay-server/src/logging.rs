use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::error::ServerError;

/// Logging configuration for the relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Whether to enable JSON formatted logs
    pub json_format: bool,

    /// Whether to include thread names in logs
    pub include_thread_names: bool,

    /// Whether to include file and line number information
    pub include_file_info: bool,

    /// Whether to enable colored output (stdout, non-JSON only)
    pub enable_colors: bool,

    /// Log file path; rotated daily. Logs go to stdout when unset.
    pub log_file: Option<String>,

    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();
        module_levels.insert("hyper".to_string(), "warn".to_string());
        module_levels.insert("reqwest".to_string(), "warn".to_string());
        module_levels.insert("tower_http".to_string(), "info".to_string());

        Self {
            level: "info".to_string(),
            json_format: false,
            include_thread_names: false,
            include_file_info: false,
            enable_colors: true,
            log_file: None,
            module_levels,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        if !levels::is_valid_level(&self.level) {
            return Err(ServerError::Logging(format!(
                "Invalid log level '{}', expected one of: {}",
                self.level,
                levels::valid_levels().join(", ")
            )));
        }
        Ok(())
    }
}

/// Build the filter. `RUST_LOG` wins over the configured level when set.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, ServerError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::new(config.level.to_lowercase());
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| ServerError::Logging(format!("Invalid log directive '{}': {}", directive, e)))?,
        );
    }
    Ok(filter)
}

/// Initialize logging based on the provided configuration.
///
/// The returned guard flushes the file writer on drop and must be kept
/// alive for the lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ServerError> {
    config.validate()?;
    let filter = build_filter(config)?;

    let (writer, guard) = match &config.log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(create_file_appender(path)?);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_thread_names(config.include_thread_names)
                    .with_file(config.include_file_info)
                    .with_line_number(config.include_file_info),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_target(true)
                    .with_thread_names(config.include_thread_names)
                    .with_file(config.include_file_info)
                    .with_line_number(config.include_file_info)
                    .with_ansi(config.enable_colors && config.log_file.is_none()),
            )
            .try_init()
    };

    match result {
        Ok(_) => {
            tracing::info!("Logging initialized with config level: {}", config.level);
        }
        Err(_) => {
            // Logging already initialized, that's fine
            tracing::debug!("Logging already initialized, skipping");
        }
    }

    Ok(guard)
}

/// Create a daily-rotated file appender
fn create_file_appender(log_file: &str) -> Result<tracing_appender::rolling::RollingFileAppender, ServerError> {
    use std::path::Path;
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let log_path = Path::new(log_file);
    let directory = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let filename = log_path
        .file_name()
        .ok_or_else(|| ServerError::Logging("Invalid log file name".to_string()))?;

    std::fs::create_dir_all(directory)
        .map_err(|e| ServerError::Logging(format!("Failed to create log directory: {}", e)))?;

    Ok(RollingFileAppender::new(Rotation::DAILY, directory, filename))
}

/// Log level utilities
pub mod levels {
    /// Check if a log level string is valid
    pub fn is_valid_level(level: &str) -> bool {
        matches!(level.to_lowercase().as_str(), "trace" | "debug" | "info" | "warn" | "error")
    }

    /// Get all valid log levels
    pub fn valid_levels() -> Vec<&'static str> {
        vec!["trace", "debug", "info", "warn", "error"]
    }
}
