use clap::Parser;
use relay_core::RelayConfig;
use std::path::PathBuf;

use crate::logging::LoggingConfig;
use crate::ServerConfig;

/// Capture Relay - records, rewrites and intercepts traffic pushed by a capturing client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// HTTP port for the capture and admin APIs
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Directory holding the JSON collection files
    #[arg(long, env = "RELAY_DATA_DIR", default_value = "./db")]
    pub data_dir: PathBuf,

    /// Keep all collections in memory instead of on disk
    #[arg(long)]
    pub in_memory: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Write logs to this file, rotated daily
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<String>,

    /// Emit JSON formatted logs
    #[arg(long)]
    pub log_json: bool,

    /// Maximum request body size in megabytes
    #[arg(long, env = "BODY_LIMIT_MB", default_value_t = 10)]
    pub body_limit_mb: usize,

    /// Days of captured data to keep; 0 disables the retention sweep
    #[arg(long, env = "RETENTION_DAYS", default_value_t = 7)]
    pub retention_days: u32,

    /// Timeout for releasing intercepted requests to the origin, in seconds
    #[arg(long, default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Start with request interception enabled
    #[arg(long)]
    pub intercept: bool,
}

impl Args {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            data_dir: (!self.in_memory).then_some(self.data_dir),
            body_limit_bytes: self.body_limit_mb.saturating_mul(1024 * 1024),
            relay: RelayConfig {
                intercept_enabled: self.intercept,
                upstream_timeout_secs: self.upstream_timeout_secs,
                retention_days: self.retention_days,
                ..RelayConfig::default()
            },
            logging: LoggingConfig {
                level: self.log_level,
                json_format: self.log_json,
                log_file: self.log_file,
                ..LoggingConfig::default()
            },
        }
    }
}
