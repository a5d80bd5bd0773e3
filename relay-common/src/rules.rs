//! Rule definitions
//!
//! Three rule kinds share the same matching vocabulary (host substring,
//! method, path regex) and differ in what they do once selected:
//! - [`CaptureRule`] decides whether an envelope is persisted at all
//! - [`ResponseRule`] rewrites the response handed back to the client
//! - [`InterceptRule`] holds a request until an operator releases it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::headers::HeaderMap;

fn enabled_by_default() -> bool {
    true
}

fn any() -> String {
    "*".to_string()
}

fn any_path() -> String {
    ".*".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRule {
    pub id: String,
    /// Substring of the hostname; empty matches every host
    #[serde(default)]
    pub host: String,
    /// Uppercased methods; empty matches every method
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// `methods` may arrive as a single string or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MethodsInput {
    One(String),
    Many(Vec<String>),
}

impl MethodsInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            MethodsInput::One(method) => vec![method],
            MethodsInput::Many(methods) => methods,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewCaptureRule {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub methods: Option<MethodsInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "any")]
    pub host: String,
    #[serde(default = "any_path")]
    pub path_regex: String,
    #[serde(default = "any")]
    pub method: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub response_status: Option<u16>,
    #[serde(default)]
    pub response_headers: Option<HeaderMap>,
    /// Replacement body template
    #[serde(default)]
    pub response_body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Create/update payload for response rules. On update, absent fields keep
/// their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRuleInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub path_regex: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub response_status: Option<u16>,
    #[serde(default)]
    pub response_headers: Option<HeaderMap>,
    #[serde(default)]
    pub response_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "any")]
    pub host: String,
    #[serde(default = "any")]
    pub method: String,
    #[serde(default = "any_path")]
    pub path_regex: String,
    /// Shallow-merged over the held request's headers
    #[serde(default)]
    pub modify_headers: Option<HeaderMap>,
    /// Replaces the held request's body
    #[serde(default)]
    pub modify_body: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptRuleInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path_regex: Option<String>,
    #[serde(default)]
    pub modify_headers: Option<HeaderMap>,
    #[serde(default)]
    pub modify_body: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}
