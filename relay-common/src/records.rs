//! Stored record types
//!
//! Field names follow the on-disk JSON layout of the capture collections,
//! which mixes snake_case (capture records) and camelCase (rule-derived
//! fields). Most fields are `#[serde(default)]` so hand-edited or older
//! collection files still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

use crate::body::CapturedBody;
use crate::headers::HeaderMap;

/// Typed view used by the query layer for filtering and ordering.
pub trait Searchable {
    /// URL the record refers to. Host filtering parses it.
    fn url(&self) -> &str;

    /// Server-side timestamp. `None` sorts as the oldest possible record.
    fn server_timestamp(&self) -> Option<DateTime<Utc>>;

    /// Fields that keyword search looks at: url, method, serialized
    /// headers, body text and status.
    fn searchable_fields(&self) -> Vec<Cow<'_, str>>;

    fn hostname(&self) -> Option<String> {
        url::Url::parse(self.url())
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_string))
    }
}

fn headers_text(headers: &HeaderMap) -> Cow<'static, str> {
    Cow::Owned(serde_json::to_string(headers).unwrap_or_default())
}

fn body_text(body: &Option<CapturedBody>) -> Cow<'_, str> {
    body.as_ref()
        .map(CapturedBody::search_text)
        .unwrap_or(Cow::Borrowed(""))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<CapturedBody>,
    /// Where the record came from (`rewrite_request`, ...)
    #[serde(rename = "capture_type", default)]
    pub source: String,
    #[serde(default)]
    pub server_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub server_request_id: String,
}

impl CapturedRequest {
    /// True when `id` names this request by client or server id.
    pub fn answers_to(&self, id: &str) -> bool {
        self.id == id || self.server_request_id == id
    }
}

impl Searchable for CapturedRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn server_timestamp(&self) -> Option<DateTime<Utc>> {
        self.server_timestamp
    }

    fn searchable_fields(&self) -> Vec<Cow<'_, str>> {
        vec![
            Cow::Borrowed(self.url.as_str()),
            Cow::Borrowed(self.method.as_str()),
            headers_text(&self.headers),
            body_text(&self.body),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<CapturedBody>,
    #[serde(default)]
    pub body_size: usize,
    #[serde(rename = "capture_type", default)]
    pub source: String,
    #[serde(default)]
    pub server_timestamp: Option<DateTime<Utc>>,
}

fn default_status() -> u16 {
    200
}

impl CapturedResponse {
    pub fn answers_to(&self, id: &str) -> bool {
        self.id == id || self.request_id.as_deref() == Some(id)
    }
}

impl Searchable for CapturedResponse {
    fn url(&self) -> &str {
        &self.url
    }

    fn server_timestamp(&self) -> Option<DateTime<Utc>> {
        self.server_timestamp
    }

    fn searchable_fields(&self) -> Vec<Cow<'_, str>> {
        vec![
            Cow::Borrowed(self.url.as_str()),
            Cow::Borrowed(self.method.as_str()),
            headers_text(&self.headers),
            body_text(&self.body),
            Cow::Owned(self.status.to_string()),
        ]
    }
}

/// A response rewritten by a response rule, as returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifiedResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub original_url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub body_size: usize,
    #[serde(rename = "matchedRule", default)]
    pub matched_rule: String,
    #[serde(rename = "ruleName", default)]
    pub rule_name: String,
    #[serde(rename = "matchedRulesCount", default)]
    pub matched_rules_count: usize,
    #[serde(default)]
    pub server_timestamp: Option<DateTime<Utc>>,
}

impl Searchable for ModifiedResponse {
    fn url(&self) -> &str {
        &self.original_url
    }

    fn server_timestamp(&self) -> Option<DateTime<Utc>> {
        self.server_timestamp
    }

    fn searchable_fields(&self) -> Vec<Cow<'_, str>> {
        vec![
            Cow::Borrowed(self.original_url.as_str()),
            Cow::Borrowed(self.method.as_str()),
            headers_text(&self.headers),
            Cow::Borrowed(self.body.as_str()),
            Cow::Owned(self.status.to_string()),
        ]
    }
}

/// Pristine inbound request, frozen before any rule touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginalRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<CapturedBody>,
}

/// What came back from the origin, or a synthetic 500 when the call failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<CapturedBody>,
    #[serde(default)]
    pub body_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl UpstreamResponse {
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: 500,
            headers: HeaderMap::new(),
            body_size: message.len(),
            body: Some(CapturedBody::Text(message.clone())),
            error: Some(message),
            received_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptedRequest {
    /// Release handle; unique within the intercepted collection
    pub id: String,
    /// Id of the captured request this record was made from
    #[serde(default)]
    pub request_id: Option<String>,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HeaderMap,
    /// Current body; an intercept rule may have replaced it
    #[serde(default)]
    pub body: Option<CapturedBody>,
    pub original_request: OriginalRequest,
    #[serde(default)]
    pub intercepted: bool,
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub auto_released: bool,
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub matched_rule_id: Option<String>,
    #[serde(default)]
    pub response: Option<UpstreamResponse>,
    pub created_at: DateTime<Utc>,
}

impl InterceptedRequest {
    pub fn is_pending(&self) -> bool {
        self.intercepted && !self.released
    }
}

impl Searchable for InterceptedRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn server_timestamp(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn searchable_fields(&self) -> Vec<Cow<'_, str>> {
        let mut fields = vec![
            Cow::Borrowed(self.url.as_str()),
            Cow::Borrowed(self.method.as_str()),
            headers_text(&self.headers),
            body_text(&self.body),
        ];
        if let Some(response) = &self.response {
            fields.push(Cow::Owned(response.status.to_string()));
        }
        fields
    }
}
