//! Capture gate: the global flag plus capture rules decide what is persisted.

use chrono::Utc;
use relay_common::headers::content_type;
use relay_common::{
    CapturedBody, CapturedRequest, CapturedResponse, RequestEnvelope, RequestIdGenerator,
    ResponseEnvelope,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::RelayFlags;
use crate::matcher::{capture_allowed, MatchTarget};
use crate::metrics::Metrics;
use crate::rules::RuleStore;
use crate::store::Collection;

/// Record built from an envelope, and whether it reached the store.
#[derive(Debug, Clone)]
pub struct CaptureOutcome<T> {
    pub record: T,
    pub persisted: bool,
}

/// Build the stored form of a request envelope.
pub fn request_record(envelope: &RequestEnvelope, server_request_id: String, source: &str) -> CapturedRequest {
    let body = CapturedBody::from_envelope(envelope.body.clone(), content_type(&envelope.headers));
    CapturedRequest {
        id: envelope.id.clone().unwrap_or_else(|| server_request_id.clone()),
        timestamp: envelope.timestamp.clone(),
        method: envelope.method.to_ascii_uppercase(),
        url: envelope.url.clone(),
        headers: envelope.headers.clone(),
        body,
        source: source.to_string(),
        server_timestamp: Some(Utc::now()),
        server_request_id,
    }
}

/// Build the stored form of a response envelope.
pub fn response_record(envelope: &ResponseEnvelope, server_request_id: String, source: &str) -> CapturedResponse {
    let body = CapturedBody::from_envelope(envelope.body.clone(), content_type(&envelope.headers));
    let body_size = envelope
        .body_size
        .unwrap_or_else(|| body.as_ref().map(CapturedBody::len).unwrap_or(0));

    CapturedResponse {
        id: server_request_id,
        request_id: envelope.request_id.clone(),
        url: envelope.url.clone(),
        method: envelope
            .method
            .as_deref()
            .map(str::to_ascii_uppercase)
            .unwrap_or_default(),
        status: envelope.status.unwrap_or(200),
        headers: envelope.headers.clone(),
        body,
        body_size,
        source: source.to_string(),
        server_timestamp: Some(Utc::now()),
    }
}

#[derive(Clone)]
pub struct CaptureEngine {
    flags: Arc<RelayFlags>,
    rules: Arc<RuleStore>,
    ids: Arc<RequestIdGenerator>,
    requests: Collection<CapturedRequest>,
    responses: Collection<CapturedResponse>,
    metrics: Arc<Metrics>,
}

impl CaptureEngine {
    pub fn new(
        flags: Arc<RelayFlags>,
        rules: Arc<RuleStore>,
        ids: Arc<RequestIdGenerator>,
        requests: Collection<CapturedRequest>,
        responses: Collection<CapturedResponse>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            flags,
            rules,
            ids,
            requests,
            responses,
            metrics,
        }
    }

    pub async fn capture_request(&self, envelope: &RequestEnvelope, source: &str) -> CaptureOutcome<CapturedRequest> {
        let record = request_record(envelope, self.ids.next_id(), source);
        if !self.admits(&record.url, &record.method).await {
            return self.skipped(record);
        }
        let outcome = persist(&self.requests, record, &self.metrics).await;
        if outcome.persisted {
            Metrics::incr(&self.metrics.requests_captured);
        }
        outcome
    }

    pub async fn capture_response(&self, envelope: &ResponseEnvelope, source: &str) -> CaptureOutcome<CapturedResponse> {
        let record = response_record(envelope, self.ids.next_id(), source);
        if !self.admits(&record.url, &record.method).await {
            return self.skipped(record);
        }
        let outcome = persist(&self.responses, record, &self.metrics).await;
        if outcome.persisted {
            Metrics::incr(&self.metrics.responses_captured);
        }
        outcome
    }

    async fn admits(&self, url: &str, method: &str) -> bool {
        if !self.flags.capture_enabled() {
            debug!(url, "Capture paused, not persisting");
            return false;
        }
        let rules = self.rules.capture_rules().await;
        let allowed = capture_allowed(&rules, &MatchTarget::from_url(url, method));
        if !allowed {
            debug!(url, method, "No capture rule matched, not persisting");
        }
        allowed
    }

    fn skipped<T>(&self, record: T) -> CaptureOutcome<T> {
        Metrics::incr(&self.metrics.captures_skipped);
        CaptureOutcome {
            record,
            persisted: false,
        }
    }
}

/// Append `record`; a store failure is logged and reported as unpersisted.
pub(crate) async fn persist<T>(collection: &Collection<T>, record: T, metrics: &Metrics) -> CaptureOutcome<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    match collection.append(&record).await {
        Ok(()) => CaptureOutcome {
            record,
            persisted: true,
        },
        Err(e) => {
            error!(collection = collection.name(), error = %e, "Failed to persist record");
            Metrics::incr(&metrics.persistence_failures);
            CaptureOutcome {
                record,
                persisted: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::error::StoreError;
    use crate::store::{CollectionStatus, CollectionStore, Collections, MemoryStore};
    use async_trait::async_trait;
    use relay_common::NewCaptureRule;
    use serde_json::{json, Value};

    struct Fixture {
        engine: CaptureEngine,
        flags: Arc<RelayFlags>,
        rules: Arc<RuleStore>,
        collections: Collections,
    }

    async fn fixture(store: Arc<dyn CollectionStore>) -> Fixture {
        let collections = Collections::new(store);
        let flags = Arc::new(RelayFlags::new(&RelayConfig::default()));
        let rules = Arc::new(RuleStore::load(&collections).await.unwrap());
        let engine = CaptureEngine::new(
            flags.clone(),
            rules.clone(),
            Arc::new(RequestIdGenerator::new()),
            collections.requests.clone(),
            collections.responses.clone(),
            Arc::new(Metrics::default()),
        );
        Fixture {
            engine,
            flags,
            rules,
            collections,
        }
    }

    /// Reads work, every write fails.
    struct ReadOnlyStore;

    #[async_trait]
    impl CollectionStore for ReadOnlyStore {
        async fn read_all(&self, _collection: &str) -> Result<Vec<Value>, StoreError> {
            Ok(Vec::new())
        }

        async fn append(&self, collection: &str, _record: Value) -> Result<(), StoreError> {
            Err(StoreError::io(
                collection,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ))
        }

        async fn replace_all(&self, collection: &str, _records: Vec<Value>) -> Result<(), StoreError> {
            self.append(collection, Value::Null).await
        }

        async fn status(&self, collection: &str) -> CollectionStatus {
            CollectionStatus {
                collection: collection.to_string(),
                location: None,
                exists: false,
                size_bytes: 0,
            }
        }
    }

    #[tokio::test]
    async fn test_empty_rule_set_captures_everything() {
        let f = fixture(Arc::new(MemoryStore::new())).await;
        let mut envelope = RequestEnvelope::new("get", "https://example.com/a");
        envelope.id = Some("client-1".into());
        envelope.headers.insert("Content-Type".into(), "application/json".into());
        envelope.body = Some(json!("{\"a\":1}"));

        let outcome = f.engine.capture_request(&envelope, "rewrite_request").await;
        assert!(outcome.persisted);
        assert_eq!(outcome.record.id, "client-1");
        assert_eq!(outcome.record.method, "GET");
        assert_eq!(outcome.record.body, Some(CapturedBody::Json(json!({"a": 1}))));

        let stored = f.collections.requests.read_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source, "rewrite_request");
    }

    #[tokio::test]
    async fn test_disabled_flag_skips_persistence() {
        let f = fixture(Arc::new(MemoryStore::new())).await;
        f.flags.set_capture_enabled(false);

        let outcome = f
            .engine
            .capture_response(&ResponseEnvelope::new("GET", "https://example.com/a", 200), "rewrite_response")
            .await;
        assert!(!outcome.persisted);
        assert!(f.collections.responses.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_empty_rule_set_denies_unmatched() {
        let f = fixture(Arc::new(MemoryStore::new())).await;
        f.rules
            .add_capture_rule(NewCaptureRule {
                host: "example.com".into(),
                methods: None,
            })
            .await
            .unwrap();

        let hit = f
            .engine
            .capture_request(&RequestEnvelope::new("GET", "https://api.example.com/"), "rewrite_request")
            .await;
        let miss = f
            .engine
            .capture_request(&RequestEnvelope::new("GET", "https://other.org/"), "rewrite_request")
            .await;

        assert!(hit.persisted);
        assert!(!miss.persisted);
        assert_eq!(f.collections.requests.read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_returns_unpersisted_record() {
        let f = fixture(Arc::new(ReadOnlyStore)).await;
        let outcome = f
            .engine
            .capture_request(&RequestEnvelope::new("POST", "https://example.com/"), "rewrite_request")
            .await;
        assert!(!outcome.persisted);
        assert_eq!(outcome.record.url, "https://example.com/");
    }

    #[test]
    fn test_response_record_defaults() {
        let envelope = ResponseEnvelope {
            url: "https://example.com/".into(),
            body: Some(json!("hello")),
            ..Default::default()
        };
        let record = response_record(&envelope, "srv-1".into(), "rewrite_response");
        assert_eq!(record.status, 200);
        assert_eq!(record.method, "");
        assert_eq!(record.body_size, 5);
        assert_eq!(record.id, "srv-1");
    }
}
