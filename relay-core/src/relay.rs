//! The relay: owns the flags, rule store and engines, and implements the
//! three capture-API operations on top of them.

use chrono::Utc;
use relay_common::{RequestEnvelope, RequestIdGenerator, ResponseEnvelope, HeaderMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::capture::CaptureEngine;
use crate::config::{RelayConfig, RelayFlags, ToggleStatus};
use crate::intercept::{InterceptionEngine, Submission};
use crate::metrics::Metrics;
use crate::modify::{DerivedResponse, ModificationEngine};
use crate::query::QueryService;
use crate::rules::RuleStore;
use crate::store::{CollectionStore, Collections, MemoryStore};
use crate::upstream::UpstreamClient;
use crate::Result;

pub const SOURCE_REQUEST: &str = "rewrite_request";
pub const SOURCE_RESPONSE: &str = "rewrite_response";
pub const SOURCE_RESPONSE_MODIFY: &str = "rewrite_response_modify";

/// Acknowledgement returned to the capturing client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercepted: Option<bool>,
    pub request_id: String,
    pub timestamp: String,
}

impl CaptureAck {
    pub fn stored(request_id: String) -> Self {
        Self {
            success: Some(true),
            intercepted: None,
            request_id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn intercepted(request_id: String) -> Self {
        Self {
            success: None,
            intercepted: Some(true),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Answer of the modify endpoint. `modified: false` tells the client to
/// forward the original response untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyReply {
    pub modified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModifyReply {
    pub fn unmodified() -> Self {
        Self {
            modified: false,
            status: None,
            headers: None,
            body: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::unmodified()
        }
    }
}

impl From<DerivedResponse> for ModifyReply {
    fn from(derived: DerivedResponse) -> Self {
        Self {
            modified: true,
            status: Some(derived.status),
            headers: Some(derived.headers),
            body: Some(derived.body),
            error: None,
        }
    }
}

pub struct Relay {
    config: RelayConfig,
    flags: Arc<RelayFlags>,
    rules: Arc<RuleStore>,
    capture: CaptureEngine,
    modification: ModificationEngine,
    interception: InterceptionEngine,
    query: QueryService,
    metrics: Arc<Metrics>,
}

impl Relay {
    /// Load the rule collections from `store` and wire the engines.
    pub async fn new(
        config: RelayConfig,
        store: Arc<dyn CollectionStore>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Result<Self> {
        let collections = Collections::new(store);
        let flags = Arc::new(RelayFlags::new(&config));
        let rules = Arc::new(RuleStore::load(&collections).await?);
        let metrics = Arc::new(Metrics::default());
        let ids = Arc::new(RequestIdGenerator::new());

        let capture = CaptureEngine::new(
            Arc::clone(&flags),
            Arc::clone(&rules),
            ids,
            collections.requests.clone(),
            collections.responses.clone(),
            Arc::clone(&metrics),
        );
        let modification = ModificationEngine::new(
            Arc::clone(&flags),
            Arc::clone(&rules),
            collections.modified_responses.clone(),
            Arc::clone(&metrics),
        );
        let interception = InterceptionEngine::new(
            Arc::clone(&rules),
            collections.intercepted.clone(),
            collections.responses.clone(),
            upstream,
            config.upstream_timeout(),
            Arc::clone(&metrics),
        );
        let query = QueryService::new(collections);

        info!(
            capture_enabled = config.capture_enabled,
            intercept_enabled = config.intercept_enabled,
            upstream_timeout_secs = config.upstream_timeout_secs,
            "Relay initialized"
        );

        Ok(Self {
            config,
            flags,
            rules,
            capture,
            modification,
            interception,
            query,
            metrics,
        })
    }

    /// Relay backed by a [`MemoryStore`].
    pub async fn in_memory(config: RelayConfig, upstream: Arc<dyn UpstreamClient>) -> Result<Self> {
        Self::new(config, Arc::new(MemoryStore::new()), upstream).await
    }

    /// Record a request and, when interception is on, hold or forward it.
    pub async fn capture_request(&self, envelope: RequestEnvelope) -> CaptureAck {
        let outcome = self.capture.capture_request(&envelope, SOURCE_REQUEST).await;
        let request_id = outcome.record.id;
        debug!(request_id = %request_id, url = %envelope.url, persisted = outcome.persisted, "Request captured");

        if self.flags.intercept_enabled() {
            match self.interception.submit(request_id.clone(), &envelope).await {
                Submission::Held(held) => return CaptureAck::intercepted(held.id),
                // runs to completion on its own
                Submission::AutoReleased(_task) => {}
            }
        }
        CaptureAck::stored(request_id)
    }

    pub async fn capture_response(&self, envelope: ResponseEnvelope) -> CaptureAck {
        let outcome = self.capture.capture_response(&envelope, SOURCE_RESPONSE).await;
        let record = outcome.record;
        debug!(url = %record.url, status = record.status, persisted = outcome.persisted, "Response captured");
        CaptureAck::stored(record.request_id.unwrap_or(record.id))
    }

    /// Record the response, then rewrite it if a response rule matches.
    pub async fn modify_response(&self, envelope: ResponseEnvelope) -> ModifyReply {
        let outcome = self.capture.capture_response(&envelope, SOURCE_RESPONSE_MODIFY).await;
        match self.modification.apply_response_rules(&outcome.record).await {
            Some(derived) => derived.into(),
            None => ModifyReply::unmodified(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn capture_status(&self) -> ToggleStatus {
        ToggleStatus::new(self.flags.capture_enabled())
    }

    pub fn set_capture_enabled(&self, enabled: bool) -> ToggleStatus {
        self.flags.set_capture_enabled(enabled);
        info!(enabled, "Capture toggled");
        self.capture_status()
    }

    pub fn intercept_status(&self) -> ToggleStatus {
        ToggleStatus::new(self.flags.intercept_enabled())
    }

    pub fn set_intercept_enabled(&self, enabled: bool) -> ToggleStatus {
        self.flags.set_intercept_enabled(enabled);
        info!(enabled, "Interception toggled");
        self.intercept_status()
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn interception(&self) -> &InterceptionEngine {
        &self.interception
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamRequest;
    use async_trait::async_trait;
    use relay_common::{ResponseRuleInput, UpstreamResponse};
    use serde_json::json;

    struct NoUpstream;

    #[async_trait]
    impl UpstreamClient for NoUpstream {
        async fn send(&self, _request: &UpstreamRequest) -> Result<UpstreamResponse> {
            Err(crate::RelayError::Upstream("offline".into()))
        }
    }

    async fn relay() -> Relay {
        Relay::in_memory(RelayConfig::default(), Arc::new(NoUpstream)).await.unwrap()
    }

    #[tokio::test]
    async fn test_capture_request_ack_uses_client_id() {
        let relay = relay().await;
        let mut envelope = RequestEnvelope::new("GET", "https://example.com/");
        envelope.id = Some("client-7".into());

        let ack = relay.capture_request(envelope).await;
        assert_eq!(ack.success, Some(true));
        assert_eq!(ack.request_id, "client-7");
        assert!(relay.query().find_request("client-7").await.is_ok());
    }

    #[tokio::test]
    async fn test_capture_response_ack_prefers_request_id() {
        let relay = relay().await;
        let mut envelope = ResponseEnvelope::new("GET", "https://example.com/", 200);
        envelope.request_id = Some("req_1".into());
        assert_eq!(relay.capture_response(envelope).await.request_id, "req_1");
    }

    #[tokio::test]
    async fn test_modify_without_rules_is_unmodified() {
        let relay = relay().await;
        let reply = relay
            .modify_response(ResponseEnvelope::new("GET", "https://example.com/", 200))
            .await;
        assert_eq!(reply, ModifyReply::unmodified());

        let stored = relay.query().responses(&Default::default()).await.unwrap();
        assert_eq!(stored.data[0].source, SOURCE_RESPONSE_MODIFY);
    }

    #[tokio::test]
    async fn test_modify_with_rule() {
        let relay = relay().await;
        relay
            .rules()
            .add_response_rule(ResponseRuleInput {
                host: Some("api.example.com".into()),
                path_regex: Some("^/v1/user$".into()),
                method: Some("GET".into()),
                response_status: Some(200),
                response_body: Some(r#"{"name":"Mock"}"#.into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut envelope = ResponseEnvelope::new("GET", "https://api.example.com/v1/user", 200);
        envelope.headers.insert("content-type".into(), "application/json".into());
        envelope.body = Some(json!("{\"name\":\"Real\"}"));

        let reply = relay.modify_response(envelope).await;
        assert!(reply.modified);
        assert_eq!(reply.body.as_deref(), Some(r#"{"name":"Mock"}"#));
        assert_eq!(relay.metrics().snapshot().capture.modified, 1);
    }

    #[tokio::test]
    async fn test_intercept_flag_controls_holding() {
        let relay = relay().await;
        relay
            .rules()
            .add_intercept_rule(Default::default())
            .await
            .unwrap();

        let ack = relay.capture_request(RequestEnvelope::new("GET", "https://example.com/")).await;
        assert_eq!(ack.success, Some(true));

        relay.set_intercept_enabled(true);
        let ack = relay.capture_request(RequestEnvelope::new("GET", "https://example.com/")).await;
        assert_eq!(ack.intercepted, Some(true));
        assert_eq!(relay.interception().list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_toggles() {
        let relay = relay().await;
        assert_eq!(relay.capture_status().status, "active");
        assert!(!relay.set_capture_enabled(false).enabled);
        assert_eq!(relay.capture_status().status, "paused");
        assert!(!relay.intercept_status().enabled);
    }
}
