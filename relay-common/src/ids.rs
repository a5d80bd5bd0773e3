//! Identifier generation

use chrono::Local;
use std::sync::atomic::{AtomicU32, Ordering};

/// Generates readable server-side request ids: `YYYYMMDD_HHMMSS_NNN`.
///
/// The trailing counter wraps at 1000 and only disambiguates ids issued
/// within the same second.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU32,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let sequence = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some((n + 1) % 1000))
            .map(|previous| (previous + 1) % 1000)
            .unwrap_or(0);
        format!("{}_{:03}", Local::now().format("%Y%m%d_%H%M%S"), sequence)
    }
}

/// Opaque id for rules and held requests.
pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_format() {
        let generator = RequestIdGenerator::new();
        let id = generator.next_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2], "001");
    }

    #[test]
    fn test_counter_wraps() {
        let generator = RequestIdGenerator::new();
        for _ in 0..999 {
            generator.next_id();
        }
        assert!(generator.next_id().ends_with("_000"));
        assert!(generator.next_id().ends_with("_001"));
    }
}
