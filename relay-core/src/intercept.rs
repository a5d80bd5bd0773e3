//! Hold / auto-release / manual-release of intercepted requests
//!
//! A submitted request either matches an intercept rule and is held until
//! an operator releases it, or is forwarded to the origin right away
//! ("auto-released"). Either way the outcome is stored in the intercepted
//! collection, and every origin response is also appended to the response
//! collection.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_common::headers::merge_headers;
use relay_common::ids::new_record_id;
use relay_common::{
    CapturedBody, CapturedResponse, InterceptRule, InterceptedRequest, OriginalRequest,
    RequestEnvelope, UpstreamResponse,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::capture::persist;
use crate::error::RelayError;
use crate::matcher::{best_match, MatchTarget};
use crate::metrics::Metrics;
use crate::rules::RuleStore;
use crate::store::Collection;
use crate::upstream::{UpstreamClient, UpstreamRequest};
use crate::Result;

const HELD_KIND: &str = "intercepted request";

/// What happened to a submitted request.
#[derive(Debug)]
pub enum Submission {
    /// Matched an intercept rule; waits for release
    Held(InterceptedRequest),
    /// No rule matched; the origin call runs in the background
    AutoReleased(JoinHandle<InterceptedRequest>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOutcome {
    pub request: InterceptedRequest,
    pub already_released: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReleaseItem {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub already_released: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl BatchReleaseItem {
    fn released(id: String, outcome: &ReleaseOutcome) -> Self {
        Self {
            id,
            success: true,
            error: None,
            already_released: Some(outcome.already_released),
            status: outcome.request.response.as_ref().map(|r| r.status),
        }
    }

    fn failed(id: String, error: String) -> Self {
        Self {
            id,
            success: false,
            error: Some(error),
            already_released: None,
            status: None,
        }
    }
}

#[derive(Clone)]
pub struct InterceptionEngine {
    rules: Arc<RuleStore>,
    held: Collection<InterceptedRequest>,
    responses: Collection<CapturedResponse>,
    upstream: Arc<dyn UpstreamClient>,
    timeout: Duration,
    /// Maps request id -> lock serializing releases of that id
    release_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    metrics: Arc<Metrics>,
}

impl InterceptionEngine {
    pub fn new(
        rules: Arc<RuleStore>,
        held: Collection<InterceptedRequest>,
        responses: Collection<CapturedResponse>,
        upstream: Arc<dyn UpstreamClient>,
        timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            rules,
            held,
            responses,
            upstream,
            timeout,
            release_locks: Arc::new(DashMap::new()),
            metrics,
        }
    }

    /// Hold the request if an intercept rule matches, otherwise forward it.
    pub async fn submit(&self, id: String, envelope: &RequestEnvelope) -> Submission {
        let original = OriginalRequest {
            url: envelope.url.clone(),
            method: envelope.method.to_ascii_uppercase(),
            headers: envelope.headers.clone(),
            // kept as sent so the origin receives the client's exact bytes
            body: CapturedBody::from_envelope(envelope.body.clone(), None),
        };
        let created_at = Utc::now();

        let rule = {
            let rules = self.rules.intercept_rules().await;
            let target = MatchTarget::from_url(&original.url, &original.method);
            best_match(&rules, &target).map(|selected| selected.rule.clone())
        };

        match rule {
            Some(rule) => Submission::Held(self.hold(id, original, &rule, created_at).await),
            None => {
                let engine = self.clone();
                Submission::AutoReleased(tokio::spawn(async move {
                    engine.auto_release(id, original, created_at).await
                }))
            }
        }
    }

    async fn hold(
        &self,
        id: String,
        original: OriginalRequest,
        rule: &InterceptRule,
        created_at: DateTime<Utc>,
    ) -> InterceptedRequest {
        let headers = match &rule.modify_headers {
            Some(overrides) => merge_headers(&original.headers, overrides),
            None => original.headers.clone(),
        };
        let body = match &rule.modify_body {
            Some(body) => Some(CapturedBody::Text(body.clone())),
            None => original.body.clone(),
        };

        let record = InterceptedRequest {
            request_id: Some(id.clone()),
            id,
            url: original.url.clone(),
            method: original.method.clone(),
            headers,
            body,
            original_request: original,
            intercepted: true,
            released: false,
            auto_released: false,
            released_at: None,
            matched_rule_id: Some(rule.id.clone()),
            response: None,
            created_at,
        };
        info!(request_id = %record.id, url = %record.url, rule_id = %rule.id, "Request intercepted");
        Metrics::incr(&self.metrics.requests_intercepted);

        self.store_unique(record).await
    }

    async fn auto_release(&self, id: String, original: OriginalRequest, created_at: DateTime<Utc>) -> InterceptedRequest {
        let request = UpstreamRequest::new(&original.method, &original.url, &original.headers, original.body.as_ref());
        let response = self.forward(&request).await;

        let record = InterceptedRequest {
            request_id: Some(id.clone()),
            id,
            url: original.url.clone(),
            method: original.method.clone(),
            headers: original.headers.clone(),
            body: original.body.clone(),
            original_request: original,
            intercepted: false,
            released: true,
            auto_released: true,
            released_at: Some(Utc::now()),
            matched_rule_id: None,
            response: Some(response),
            created_at,
        };
        debug!(request_id = %record.id, url = %record.url, "Request auto-released");
        Metrics::incr(&self.metrics.requests_auto_released);

        let record = self.store_unique(record).await;
        self.record_response(&record, "intercept_auto_release").await;
        record
    }

    /// Append `record`, giving it a fresh id when its id is already taken
    /// so every stored record stays releasable.
    async fn store_unique(&self, record: InterceptedRequest) -> InterceptedRequest {
        let fallback = record.clone();
        let stored = self
            .held
            .update(move |records| {
                let mut record = record;
                if records.iter().any(|existing| existing.id == record.id) {
                    let fresh = new_record_id();
                    warn!(request_id = %record.id, held_id = %fresh, "Held id already in use, assigning a new one");
                    record.id = fresh;
                }
                records.push(record.clone());
                record
            })
            .await;
        match stored {
            Ok(record) => record,
            Err(e) => {
                error!(collection = self.held.name(), error = %e, "Failed to persist record");
                Metrics::incr(&self.metrics.persistence_failures);
                fallback
            }
        }
    }

    /// Forward the current view of a held request. Idempotent: releasing an
    /// already released request returns the stored outcome.
    pub async fn release(&self, id: &str) -> Result<ReleaseOutcome> {
        let engine = self.clone();
        let id = id.to_string();
        tokio::spawn(async move { engine.release_serialized(&id).await }).await?
    }

    /// Release each id independently; results come back in input order.
    pub async fn release_many(&self, ids: Vec<String>) -> Vec<BatchReleaseItem> {
        let mut tasks = JoinSet::new();
        for (index, id) in ids.iter().cloned().enumerate() {
            let engine = self.clone();
            tasks.spawn(async move {
                let outcome = engine.release_serialized(&id).await;
                (index, id, outcome)
            });
        }

        let mut items: Vec<Option<BatchReleaseItem>> = vec![None; ids.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, id, Ok(outcome))) => items[index] = Some(BatchReleaseItem::released(id, &outcome)),
                Ok((index, id, Err(e))) => items[index] = Some(BatchReleaseItem::failed(id, e.to_string())),
                Err(e) => error!(error = %e, "Release task failed"),
            }
        }

        items
            .into_iter()
            .zip(ids)
            .map(|(item, id)| item.unwrap_or_else(|| BatchReleaseItem::failed(id, "release task failed".to_string())))
            .collect()
    }

    async fn release_serialized(&self, id: &str) -> Result<ReleaseOutcome> {
        let lock = Arc::clone(self.release_locks.entry(id.to_string()).or_default().value());
        let result = {
            let _guard = lock.lock().await;
            self.release_locked(id).await
        };
        drop(lock);
        self.release_locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn release_locked(&self, id: &str) -> Result<ReleaseOutcome> {
        let record = self
            .held
            .find(|record| record.id == id)
            .await?
            .ok_or_else(|| RelayError::not_found(HELD_KIND, id))?;

        if record.released {
            debug!(request_id = id, "Already released");
            return Ok(ReleaseOutcome {
                request: record,
                already_released: true,
            });
        }

        let request = UpstreamRequest::new(&record.method, &record.url, &record.headers, record.body.as_ref());
        let response = self.forward(&request).await;

        let mut released = record;
        released.released = true;
        released.released_at = Some(Utc::now());
        released.response = Some(response);

        let stored = released.clone();
        let updated = self
            .held
            .update(move |records| match records.iter_mut().find(|r| r.id == stored.id) {
                Some(slot) => {
                    *slot = stored;
                    true
                }
                None => false,
            })
            .await;
        match updated {
            Ok(true) => {}
            Ok(false) => return Err(RelayError::not_found(HELD_KIND, id)),
            Err(e) => {
                error!(request_id = id, error = %e, "Failed to persist release");
                Metrics::incr(&self.metrics.persistence_failures);
            }
        }

        self.record_response(&released, "intercept_release").await;
        Metrics::incr(&self.metrics.requests_released);
        info!(
            request_id = id,
            status = released.response.as_ref().map(|r| r.status),
            "Request released"
        );

        Ok(ReleaseOutcome {
            request: released,
            already_released: false,
        })
    }

    async fn forward(&self, request: &UpstreamRequest) -> UpstreamResponse {
        match tokio::time::timeout(self.timeout, self.upstream.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(url = %request.url, error = %e, "Upstream call failed");
                Metrics::incr(&self.metrics.upstream_failures);
                UpstreamResponse::failed(e.to_string())
            }
            Err(_) => {
                warn!(url = %request.url, timeout_secs = self.timeout.as_secs(), "Upstream call timed out");
                Metrics::incr(&self.metrics.upstream_failures);
                UpstreamResponse::failed(format!(
                    "Upstream request timed out after {}ms",
                    self.timeout.as_millis()
                ))
            }
        }
    }

    async fn record_response(&self, record: &InterceptedRequest, source: &str) {
        let Some(response) = &record.response else {
            return;
        };
        let captured = CapturedResponse {
            id: new_record_id(),
            request_id: record.request_id.clone().or_else(|| Some(record.id.clone())),
            url: record.url.clone(),
            method: record.method.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            body_size: response.body_size,
            source: source.to_string(),
            server_timestamp: Some(response.received_at),
        };
        persist(&self.responses, captured, &self.metrics).await;
    }

    /// Every held or released request, newest first.
    pub async fn list(&self) -> Result<Vec<InterceptedRequest>> {
        let mut all = self.held.read_all().await?;
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    /// Held requests still waiting for release.
    pub async fn list_pending(&self) -> Result<Vec<InterceptedRequest>> {
        let mut pending: Vec<InterceptedRequest> = self
            .held
            .read_all()
            .await?
            .into_iter()
            .filter(InterceptedRequest::is_pending)
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }

    pub async fn get(&self, id: &str) -> Result<InterceptedRequest> {
        self.held
            .find(|record| record.id == id)
            .await?
            .ok_or_else(|| RelayError::not_found(HELD_KIND, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Collections, MemoryStore};
    use async_trait::async_trait;
    use relay_common::{HeaderMap, InterceptRuleInput};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingUpstream {
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl UpstreamClient for CountingUpstream {
        async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(RelayError::Upstream("connection refused".into()));
            }
            let body = request
                .body
                .as_ref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_else(|| "origin".to_string());
            Ok(UpstreamResponse {
                status: 200,
                headers: HeaderMap::new(),
                body_size: body.len(),
                body: Some(CapturedBody::Text(body)),
                error: None,
                received_at: Utc::now(),
            })
        }
    }

    struct Fixture {
        engine: InterceptionEngine,
        rules: Arc<RuleStore>,
        upstream: Arc<CountingUpstream>,
        collections: Collections,
    }

    async fn fixture(upstream: CountingUpstream, timeout: Duration) -> Fixture {
        let collections = Collections::new(Arc::new(MemoryStore::new()));
        let rules = Arc::new(RuleStore::load(&collections).await.unwrap());
        let upstream = Arc::new(upstream);
        let engine = InterceptionEngine::new(
            rules.clone(),
            collections.intercepted.clone(),
            collections.responses.clone(),
            upstream.clone(),
            timeout,
            Arc::new(Metrics::default()),
        );
        Fixture {
            engine,
            rules,
            upstream,
            collections,
        }
    }

    fn login_envelope() -> RequestEnvelope {
        let mut envelope = RequestEnvelope::new("POST", "https://api.example.com/login");
        envelope.headers.insert("Content-Length".into(), "3".into());
        envelope.headers.insert("X-Client".into(), "app".into());
        envelope.body = Some(json!("abc"));
        envelope
    }

    async fn hold_login(f: &Fixture) -> InterceptedRequest {
        f.rules
            .add_intercept_rule(InterceptRuleInput {
                host: Some("api.example.com".into()),
                path_regex: Some("^/login".into()),
                modify_body: Some("B".into()),
                modify_headers: Some(HeaderMap::from([("x-client".to_string(), "relay".to_string())])),
                ..Default::default()
            })
            .await
            .unwrap();
        match f.engine.submit("held-1".into(), &login_envelope()).await {
            Submission::Held(record) => record,
            Submission::AutoReleased(_) => panic!("expected the request to be held"),
        }
    }

    #[tokio::test]
    async fn test_unmatched_request_auto_releases() {
        let f = fixture(CountingUpstream::default(), Duration::from_secs(5)).await;
        let Submission::AutoReleased(task) = f.engine.submit("r1".into(), &login_envelope()).await else {
            panic!("expected auto-release");
        };
        let record = task.await.unwrap();

        assert!(record.released && record.auto_released && !record.intercepted);
        assert!(record.released_at.is_some());
        assert_eq!(record.response.as_ref().unwrap().status, 200);
        assert_eq!(f.collections.intercepted.read_all().await.unwrap().len(), 1);

        let responses = f.collections.responses.read_all().await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].request_id.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_auto_release_upstream_failure_is_stored_as_500() {
        let upstream = CountingUpstream {
            fail: true,
            ..Default::default()
        };
        let f = fixture(upstream, Duration::from_secs(5)).await;
        let Submission::AutoReleased(task) = f.engine.submit("r1".into(), &login_envelope()).await else {
            panic!("expected auto-release");
        };
        let response = task.await.unwrap().response.unwrap();
        assert_eq!(response.status, 500);
        assert!(response.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_upstream_timeout_becomes_error_response() {
        let upstream = CountingUpstream {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let f = fixture(upstream, Duration::from_millis(50)).await;
        let Submission::AutoReleased(task) = f.engine.submit("r1".into(), &login_envelope()).await else {
            panic!("expected auto-release");
        };
        let response = task.await.unwrap().response.unwrap();
        assert_eq!(response.status, 500);
        assert!(response.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_matched_request_is_held_with_modifications() {
        let f = fixture(CountingUpstream::default(), Duration::from_secs(5)).await;
        let held = hold_login(&f).await;

        assert!(held.intercepted && !held.released);
        assert_eq!(held.body, Some(CapturedBody::Text("B".into())));
        assert_eq!(held.original_request.body, Some(CapturedBody::Text("abc".into())));
        assert_eq!(held.headers.get("x-client").map(String::as_str), Some("relay"));
        assert!(!held.headers.contains_key("X-Client"));
        assert_eq!(held.original_request.headers.get("X-Client").map(String::as_str), Some("app"));
        assert_eq!(f.upstream.calls.load(Ordering::SeqCst), 0);

        let pending = f.engine.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "held-1");
    }

    #[tokio::test]
    async fn test_release_sends_current_fields_once() {
        let f = fixture(CountingUpstream::default(), Duration::from_secs(5)).await;
        hold_login(&f).await;

        let first = f.engine.release("held-1").await.unwrap();
        assert!(!first.already_released);
        let response = first.request.response.clone().unwrap();
        assert_eq!(response.body, Some(CapturedBody::Text("B".into())));

        let second = f.engine.release("held-1").await.unwrap();
        assert!(second.already_released);
        assert_eq!(second.request.response, first.request.response);

        assert_eq!(f.upstream.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.collections.responses.read_all().await.unwrap().len(), 1);
        assert!(f.engine.list_pending().await.unwrap().is_empty());

        let stored = f.engine.get("held-1").await.unwrap();
        assert_eq!(stored.original_request.body, Some(CapturedBody::Text("abc".into())));
    }

    #[tokio::test]
    async fn test_concurrent_releases_call_upstream_once() {
        let upstream = CountingUpstream {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let f = fixture(upstream, Duration::from_secs(5)).await;
        hold_login(&f).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = f.engine.clone();
            handles.push(tokio::spawn(async move { engine.release("held-1").await }));
        }
        let mut fresh = 0;
        for handle in handles {
            if !handle.await.unwrap().unwrap().already_released {
                fresh += 1;
            }
        }

        assert_eq!(fresh, 1);
        assert_eq!(f.upstream.calls.load(Ordering::SeqCst), 1);
        assert!(f.engine.release_locks.is_empty());
    }

    #[tokio::test]
    async fn test_release_with_failing_upstream_still_succeeds() {
        let upstream = CountingUpstream {
            fail: true,
            ..Default::default()
        };
        let f = fixture(upstream, Duration::from_secs(5)).await;
        hold_login(&f).await;

        let outcome = f.engine.release("held-1").await.unwrap();
        assert!(outcome.request.released);
        assert_eq!(outcome.request.response.unwrap().status, 500);
    }

    #[tokio::test]
    async fn test_release_unknown_id_is_not_found() {
        let f = fixture(CountingUpstream::default(), Duration::from_secs(5)).await;
        assert!(matches!(
            f.engine.release("nope").await,
            Err(RelayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_release_reports_per_item() {
        let f = fixture(CountingUpstream::default(), Duration::from_secs(5)).await;
        hold_login(&f).await;

        let items = f
            .engine
            .release_many(vec!["held-1".into(), "missing".into(), "held-1".into()])
            .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "held-1");
        assert!(items[0].success && items[2].success);
        assert!(!items[1].success);
        assert!(items[1].error.as_ref().unwrap().contains("not found"));

        let fresh = items
            .iter()
            .filter(|item| item.already_released == Some(false))
            .count();
        assert_eq!(fresh, 1);
        assert_eq!(f.upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reused_id_gets_its_own_release_handle() {
        let f = fixture(CountingUpstream::default(), Duration::from_secs(5)).await;
        let first = hold_login(&f).await;
        let Submission::Held(second) = f.engine.submit("held-1".into(), &login_envelope()).await else {
            panic!("expected the request to be held");
        };

        assert_eq!(first.id, "held-1");
        assert_ne!(second.id, first.id);
        assert_eq!(second.request_id.as_deref(), Some("held-1"));

        assert!(!f.engine.release(&first.id).await.unwrap().already_released);
        assert!(!f.engine.release(&second.id).await.unwrap().already_released);
        assert!(f.engine.list_pending().await.unwrap().is_empty());
        assert_eq!(f.upstream.calls.load(Ordering::SeqCst), 2);

        let responses = f.collections.responses.read_all().await.unwrap();
        assert!(responses
            .iter()
            .all(|response| response.request_id.as_deref() == Some("held-1")));
    }

    #[tokio::test]
    async fn test_json_body_is_forwarded_byte_for_byte() {
        let f = fixture(CountingUpstream::default(), Duration::from_secs(5)).await;
        let raw = r#"{"zeta": 1, "alpha": 1.50}"#;
        let mut envelope = RequestEnvelope::new("POST", "https://api.example.com/orders");
        envelope.headers.insert("Content-Type".into(), "application/json".into());
        envelope.body = Some(json!(raw));

        let Submission::AutoReleased(task) = f.engine.submit("r1".into(), &envelope).await else {
            panic!("expected auto-release");
        };
        let record = task.await.unwrap();

        assert_eq!(record.original_request.body, Some(CapturedBody::Text(raw.into())));
        // the test origin echoes the bytes it received
        assert_eq!(record.response.unwrap().body, Some(CapturedBody::Text(raw.into())));
    }
}
