//! Capture Relay Core Library
//!
//! Rule-based capture, response modification and request interception for
//! traffic pushed by an external capturing client.
//!
//! - [`store`]: collection persistence behind the [`CollectionStore`] trait
//! - [`matcher`] and [`rules`]: rule evaluation and the in-memory rule store
//! - [`capture`], [`modify`], [`intercept`]: the three engines
//! - [`query`]: filtered, paginated reads and maintenance
//! - [`relay`]: the [`Relay`] object tying it all together

pub mod capture;
pub mod config;
pub mod error;
pub mod intercept;
pub mod matcher;
pub mod metrics;
pub mod modify;
pub mod query;
pub mod relay;
pub mod rules;
pub mod store;
pub mod upstream;

pub use capture::{CaptureEngine, CaptureOutcome};
pub use config::{RelayConfig, RelayFlags, ToggleStatus};
pub use error::{RelayError, StoreError};
pub use intercept::{BatchReleaseItem, InterceptionEngine, ReleaseOutcome, Submission};
pub use matcher::{best_match, capture_allowed, MatchRule, MatchTarget, RuleMatch};
pub use metrics::{Metrics, MetricsSnapshot};
pub use modify::{DerivedResponse, ModificationEngine};
pub use query::{
    ActiveHosts, BatchDeleteReport, CollectionCounts, DeleteSummary, Page, PageQuery, Pagination,
    QueryService, TrafficStats, CLEAR_ALL_CONFIRMATION,
};
pub use relay::{CaptureAck, ModifyReply, Relay};
pub use rules::{RuleSet, RuleStore, CLEAR_RULES_CONFIRMATION};
pub use store::{CollectionStatus, CollectionStore, Collections, JsonFileStore, MemoryStore};
pub use upstream::{ReqwestUpstream, UpstreamClient, UpstreamRequest};

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
