//! Outbound HTTP to origin servers

use async_trait::async_trait;
use chrono::Utc;
use relay_common::headers::{content_type, strip_header};
use relay_common::{CapturedBody, HeaderMap, UpstreamResponse};
use std::time::Duration;
use tracing::debug;

use crate::error::RelayError;
use crate::Result;

/// Headers describing the inbound framing; the body is re-sent whole, so
/// the client library recomputes them.
const FRAMING_HEADERS: [&str; 2] = ["content-length", "transfer-encoding"];

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl UpstreamRequest {
    pub fn new(method: &str, url: &str, headers: &HeaderMap, body: Option<&CapturedBody>) -> Self {
        let mut headers = headers.clone();
        for name in FRAMING_HEADERS {
            strip_header(&mut headers, name);
        }
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers,
            body: body.map(CapturedBody::to_bytes).filter(|bytes| !bytes.is_empty()),
        }
    }
}

/// Performs one origin call. Timeouts are applied by the caller.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse>;
}

/// `reqwest`-backed client.
#[derive(Debug, Clone)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RelayError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).unwrap_or(reqwest::Method::GET);
        let mut builder = self.client.request(method, &request.url);

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RelayError::Upstream(format!("{} {} failed: {}", request.method, request.url, e)))?;

        let mut headers = HeaderMap::new();
        for (key, value) in response.headers() {
            headers.insert(key.to_string(), value.to_str().unwrap_or("").to_string());
        }
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::Upstream(format!("Failed to read body from {}: {}", request.url, e)))?;

        debug!(url = %request.url, status, bytes = bytes.len(), "Upstream responded");

        Ok(UpstreamResponse {
            status,
            body: (!bytes.is_empty()).then(|| CapturedBody::from_bytes(&bytes, content_type(&headers))),
            body_size: bytes.len(),
            headers,
            error: None,
            received_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Length".into(), "12".into());
        headers.insert("Transfer-Encoding".into(), "chunked".into());
        headers.insert("Authorization".into(), "Bearer t".into());

        let request = UpstreamRequest::new("POST", "https://example.com/", &headers, Some(&"payload".into()));
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.body.as_deref(), Some(b"payload".as_slice()));
    }

    #[test]
    fn test_empty_body_is_omitted() {
        let request = UpstreamRequest::new("GET", "https://example.com/", &HeaderMap::new(), Some(&"".into()));
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_an_upstream_error() {
        let client = ReqwestUpstream::new(Duration::from_secs(2)).unwrap();
        let request = UpstreamRequest::new("GET", "http://127.0.0.1:1/", &HeaderMap::new(), None);
        let err = client.send(&request).await.unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
    }
}
