//! Configuration types and runtime toggles

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Relay configuration, fixed at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Initial value of the capture toggle
    pub capture_enabled: bool,
    /// Initial value of the intercept toggle
    pub intercept_enabled: bool,
    /// Bound on every origin call made by auto-release and manual release
    pub upstream_timeout_secs: u64,
    /// Captured records older than this are pruned by the retention sweep
    pub retention_days: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capture_enabled: true,
            intercept_enabled: false,
            upstream_timeout_secs: 30,
            retention_days: 7,
        }
    }
}

impl RelayConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

/// Global toggles flipped from the admin surface.
#[derive(Debug)]
pub struct RelayFlags {
    capture_enabled: AtomicBool,
    intercept_enabled: AtomicBool,
}

impl RelayFlags {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            capture_enabled: AtomicBool::new(config.capture_enabled),
            intercept_enabled: AtomicBool::new(config.intercept_enabled),
        }
    }

    pub fn capture_enabled(&self) -> bool {
        self.capture_enabled.load(Ordering::Relaxed)
    }

    pub fn set_capture_enabled(&self, enabled: bool) {
        self.capture_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn intercept_enabled(&self) -> bool {
        self.intercept_enabled.load(Ordering::Relaxed)
    }

    pub fn set_intercept_enabled(&self, enabled: bool) {
        self.intercept_enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Reported state of a toggle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleStatus {
    pub enabled: bool,
    pub status: String,
    pub timestamp: String,
}

impl ToggleStatus {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            status: if enabled { "active" } else { "paused" }.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}
