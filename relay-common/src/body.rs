//! Captured body representation
//!
//! Bodies are stored as plain text when possible, as parsed JSON when the
//! payload declares a JSON content type and actually parses, and as a
//! base64 marker object when the bytes are not valid UTF-8.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

use crate::headers::is_json_content_type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryKind {
    #[serde(rename = "binary")]
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryEncoding {
    #[serde(rename = "base64")]
    Base64,
}

/// `{ "_type": "binary", "_encoding": "base64", "data": "..." }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryBody {
    #[serde(rename = "_type")]
    pub kind: BinaryKind,
    #[serde(rename = "_encoding")]
    pub encoding: BinaryEncoding,
    pub data: String,
}

impl BinaryBody {
    pub fn encode(bytes: &[u8]) -> Self {
        Self {
            kind: BinaryKind::Binary,
            encoding: BinaryEncoding::Base64,
            data: STANDARD.encode(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapturedBody {
    Binary(BinaryBody),
    Text(String),
    Json(Value),
}

impl CapturedBody {
    /// Decode a raw payload. Non UTF-8 bytes become a binary marker.
    pub fn from_bytes(bytes: &[u8], content_type: Option<&str>) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::from_text(text.to_string(), content_type),
            Err(_) => CapturedBody::Binary(BinaryBody::encode(bytes)),
        }
    }

    /// Parse text as JSON when the content type says so. Falls back to the
    /// raw text when parsing fails or the document is a bare scalar.
    pub fn from_text(text: String, content_type: Option<&str>) -> Self {
        if content_type.is_some_and(is_json_content_type) {
            if let Ok(value @ (Value::Object(_) | Value::Array(_))) =
                serde_json::from_str::<Value>(&text)
            {
                return CapturedBody::Json(value);
            }
        }
        CapturedBody::Text(text)
    }

    /// Normalize the `body` field of an envelope.
    pub fn from_envelope(raw: Option<Value>, content_type: Option<&str>) -> Option<Self> {
        match raw? {
            Value::Null => None,
            Value::String(text) => Some(Self::from_text(text, content_type)),
            value @ Value::Object(_) => match serde_json::from_value::<BinaryBody>(value.clone()) {
                Ok(marker) => Some(CapturedBody::Binary(marker)),
                Err(_) => Some(CapturedBody::Json(value)),
            },
            value => Some(CapturedBody::Json(value)),
        }
    }

    /// Bytes to put on the wire when this body is forwarded upstream.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            CapturedBody::Text(text) => text.as_bytes().to_vec(),
            CapturedBody::Json(value) => value.to_string().into_bytes(),
            CapturedBody::Binary(marker) => STANDARD
                .decode(marker.data.as_bytes())
                .unwrap_or_else(|_| marker.data.as_bytes().to_vec()),
        }
    }

    /// Text form used by keyword search. Binary payloads are not searchable.
    pub fn search_text(&self) -> Cow<'_, str> {
        match self {
            CapturedBody::Text(text) => Cow::Borrowed(text.as_str()),
            CapturedBody::Json(value) => Cow::Owned(value.to_string()),
            CapturedBody::Binary(_) => Cow::Borrowed(""),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CapturedBody::Text(text) => text.len(),
            CapturedBody::Json(value) => value.to_string().len(),
            CapturedBody::Binary(_) => self.to_bytes().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for CapturedBody {
    fn from(text: &str) -> Self {
        CapturedBody::Text(text.to_string())
    }
}
