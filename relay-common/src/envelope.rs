//! Envelopes pushed by the capturing client

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::headers::HeaderMap;

/// Snapshot of a request observed by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Client-side id, when the client assigns one
    #[serde(default)]
    pub id: Option<String>,
    /// Client-side timestamp, kept verbatim
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Snapshot of a response observed by the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Correlates with the request envelope; best effort only
    #[serde(default)]
    pub request_id: Option<String>,
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub body_size: Option<usize>,
}

impl RequestEnvelope {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            ..Default::default()
        }
    }
}

impl ResponseEnvelope {
    pub fn new(method: &str, url: &str, status: u16) -> Self {
        Self {
            method: Some(method.to_string()),
            url: url.to_string(),
            status: Some(status),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_request_envelope() {
        let envelope: RequestEnvelope =
            serde_json::from_str(r#"{"url":"https://example.com/a","method":"GET"}"#).unwrap();
        assert_eq!(envelope.method, "GET");
        assert!(envelope.headers.is_empty());
        assert!(envelope.body.is_none());
    }

    #[test]
    fn test_response_envelope_with_null_body() {
        let envelope: ResponseEnvelope = serde_json::from_str(
            r#"{"url":"https://example.com/a","status":204,"body":null,"request_id":"req_1"}"#,
        )
        .unwrap();
        assert_eq!(envelope.status, Some(204));
        assert_eq!(envelope.request_id.as_deref(), Some("req_1"));
        assert!(envelope.body.is_none());
    }
}
