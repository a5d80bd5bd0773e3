//! Rule store
//!
//! Each rule collection is mirrored in memory. Evaluation reads an
//! `Arc<Vec<_>>` snapshot; mutations go through the collection and then swap
//! the snapshot, so a concurrent evaluation sees either the old or the new
//! rule set, never a partial one.

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use relay_common::ids::new_record_id;
use relay_common::{
    CaptureRule, InterceptRule, InterceptRuleInput, NewCaptureRule, ResponseRule,
    ResponseRuleInput,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::error::RelayError;
use crate::matcher::MatchRule;
use crate::store::{Collection, Collections};
use crate::Result;

/// Methods a capture rule may list.
pub const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Token required to drop every capture rule at once.
pub const CLEAR_RULES_CONFIRMATION: &str = "YES_DELETE_ALL_RULES";

/// Rule kinds that can be toggled and addressed by id.
pub trait ManagedRule: MatchRule + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;

    fn set_enabled(&mut self, enabled: bool, at: DateTime<Utc>);
}

impl ManagedRule for CaptureRule {
    const KIND: &'static str = "capture rule";

    fn set_enabled(&mut self, enabled: bool, at: DateTime<Utc>) {
        self.enabled = enabled;
        self.updated_at = Some(at);
    }
}

impl ManagedRule for ResponseRule {
    const KIND: &'static str = "response rule";

    fn set_enabled(&mut self, enabled: bool, at: DateTime<Utc>) {
        self.enabled = enabled;
        self.updated_at = Some(at);
    }
}

impl ManagedRule for InterceptRule {
    const KIND: &'static str = "intercept rule";

    fn set_enabled(&mut self, enabled: bool, at: DateTime<Utc>) {
        self.enabled = enabled;
        self.updated_at = Some(at);
    }
}

/// One persisted rule collection plus its in-memory mirror.
pub struct RuleSet<R> {
    collection: Collection<R>,
    snapshot: RwLock<Arc<Vec<R>>>,
    writer: Mutex<()>,
}

impl<R: ManagedRule> RuleSet<R> {
    pub async fn load(collection: Collection<R>) -> Result<Self> {
        let rules = collection.read_all().await?;
        info!(collection = collection.name(), count = rules.len(), "Loaded rules");
        Ok(Self {
            collection,
            snapshot: RwLock::new(Arc::new(rules)),
            writer: Mutex::new(()),
        })
    }

    pub async fn snapshot(&self) -> Arc<Vec<R>> {
        Arc::clone(&*self.snapshot.read().await)
    }

    pub async fn get(&self, id: &str) -> Result<R> {
        self.snapshot()
            .await
            .iter()
            .find(|rule| rule.rule_id() == id)
            .cloned()
            .ok_or_else(|| RelayError::not_found(R::KIND, id))
    }

    /// Apply `mutate` to the persisted list, then refresh the mirror.
    async fn mutate<F, T>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<R>) -> Result<T> + Send,
        T: Send,
    {
        let _writer = self.writer.lock().await;
        let (result, rules) = self
            .collection
            .update(|rules| {
                let result = mutate(rules);
                (result, rules.clone())
            })
            .await?;
        *self.snapshot.write().await = Arc::new(rules);
        result
    }

    pub async fn insert(&self, rule: R) -> Result<R> {
        let stored = rule.clone();
        self.mutate(move |rules| {
            rules.push(rule);
            Ok(())
        })
        .await?;
        Ok(stored)
    }

    pub async fn replace<F>(&self, id: &str, edit: F) -> Result<R>
    where
        F: FnOnce(&mut R) -> Result<()> + Send,
    {
        self.mutate(|rules| {
            let rule = rules
                .iter_mut()
                .find(|rule| rule.rule_id() == id)
                .ok_or_else(|| RelayError::not_found(R::KIND, id))?;
            edit(rule)?;
            Ok(rule.clone())
        })
        .await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<R> {
        let now = Utc::now();
        self.replace(id, |rule| {
            rule.set_enabled(enabled, now);
            Ok(())
        })
        .await
    }

    pub async fn delete(&self, id: &str) -> Result<R> {
        self.mutate(|rules| {
            let index = rules
                .iter()
                .position(|rule| rule.rule_id() == id)
                .ok_or_else(|| RelayError::not_found(R::KIND, id))?;
            Ok(rules.remove(index))
        })
        .await
    }

    pub async fn clear(&self) -> Result<usize> {
        self.mutate(|rules| {
            let removed = rules.len();
            rules.clear();
            Ok(removed)
        })
        .await
    }
}

fn normalize_rule_method(method: Option<String>) -> String {
    match method {
        Some(method) if !method.trim().is_empty() => {
            let method = method.trim();
            if method == "*" {
                method.to_string()
            } else {
                method.to_ascii_uppercase()
            }
        }
        _ => "*".to_string(),
    }
}

fn validate_path_regex(pattern: &str) -> Result<()> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map(|_| ())
        .map_err(|e| RelayError::Validation(format!("Invalid pathRegex '{pattern}': {e}")))
}

fn validate_status(status: Option<u16>) -> Result<()> {
    match status {
        Some(code) if !(100..=599).contains(&code) => Err(RelayError::Validation(format!(
            "responseStatus must be between 100 and 599, got {code}"
        ))),
        _ => Ok(()),
    }
}

fn normalize_capture_methods(input: NewCaptureRule) -> Result<Vec<String>> {
    let mut methods: Vec<String> = Vec::new();
    for method in input.methods.map(|m| m.into_vec()).unwrap_or_default() {
        let method = method.trim().to_ascii_uppercase();
        if !VALID_METHODS.contains(&method.as_str()) {
            return Err(RelayError::Validation(format!(
                "Invalid HTTP method '{method}'. Valid methods: {}",
                VALID_METHODS.join(", ")
            )));
        }
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    Ok(methods)
}

/// A blank host pattern means any host.
fn normalize_rule_host(host: Option<String>) -> String {
    host.filter(|h| !h.trim().is_empty()).unwrap_or_else(|| "*".to_string())
}

/// In-memory mirror of the three persisted rule collections.
pub struct RuleStore {
    capture: RuleSet<CaptureRule>,
    response: RuleSet<ResponseRule>,
    intercept: RuleSet<InterceptRule>,
}

impl RuleStore {
    pub async fn load(collections: &Collections) -> Result<Self> {
        Ok(Self {
            capture: RuleSet::load(collections.capture_rules.clone()).await?,
            response: RuleSet::load(collections.response_rules.clone()).await?,
            intercept: RuleSet::load(collections.intercept_rules.clone()).await?,
        })
    }

    pub fn capture(&self) -> &RuleSet<CaptureRule> {
        &self.capture
    }

    pub fn response(&self) -> &RuleSet<ResponseRule> {
        &self.response
    }

    pub fn intercept(&self) -> &RuleSet<InterceptRule> {
        &self.intercept
    }

    pub async fn capture_rules(&self) -> Arc<Vec<CaptureRule>> {
        self.capture.snapshot().await
    }

    pub async fn response_rules(&self) -> Arc<Vec<ResponseRule>> {
        self.response.snapshot().await
    }

    pub async fn intercept_rules(&self) -> Arc<Vec<InterceptRule>> {
        self.intercept.snapshot().await
    }

    pub async fn add_capture_rule(&self, input: NewCaptureRule) -> Result<CaptureRule> {
        let host = input.host.trim().to_string();
        if host.is_empty() {
            return Err(RelayError::Validation("Host is required".to_string()));
        }
        let methods = normalize_capture_methods(input)?;

        let rule = CaptureRule {
            id: new_record_id(),
            host,
            methods,
            enabled: true,
            created_at: Utc::now(),
            updated_at: None,
        };
        info!(rule_id = %rule.id, host = %rule.host, "Capture rule added");
        self.capture.insert(rule).await
    }

    /// Drop every capture rule. `confirm` must be [`CLEAR_RULES_CONFIRMATION`].
    pub async fn clear_capture_rules(&self, confirm: &str) -> Result<usize> {
        if confirm != CLEAR_RULES_CONFIRMATION {
            return Err(RelayError::Validation(format!(
                "Confirmation required: send confirm={CLEAR_RULES_CONFIRMATION}"
            )));
        }
        let removed = self.capture.clear().await?;
        info!(removed, "Capture rules cleared");
        Ok(removed)
    }

    pub async fn add_response_rule(&self, input: ResponseRuleInput) -> Result<ResponseRule> {
        let path_regex = input.path_regex.unwrap_or_else(|| ".*".to_string());
        validate_path_regex(&path_regex)?;
        validate_status(input.response_status)?;

        let rule = ResponseRule {
            id: new_record_id(),
            name: input.name.unwrap_or_default(),
            host: normalize_rule_host(input.host),
            path_regex,
            method: normalize_rule_method(input.method),
            enabled: input.enabled.unwrap_or(true),
            response_status: input.response_status,
            response_headers: input.response_headers,
            response_body: input.response_body.unwrap_or_default(),
            created_at: Utc::now(),
            updated_at: None,
        };
        info!(rule_id = %rule.id, name = %rule.name, "Response rule added");
        self.response.insert(rule).await
    }

    /// Overwrite the fields present in `input`; bumps `updated_at`.
    pub async fn update_response_rule(&self, id: &str, input: ResponseRuleInput) -> Result<ResponseRule> {
        if let Some(pattern) = &input.path_regex {
            validate_path_regex(pattern)?;
        }
        validate_status(input.response_status)?;
        let now = Utc::now();

        self.response
            .replace(id, move |rule| {
                if let Some(name) = input.name {
                    rule.name = name;
                }
                if input.host.is_some() {
                    rule.host = normalize_rule_host(input.host);
                }
                if let Some(path_regex) = input.path_regex {
                    rule.path_regex = path_regex;
                }
                if input.method.is_some() {
                    rule.method = normalize_rule_method(input.method);
                }
                if let Some(enabled) = input.enabled {
                    rule.enabled = enabled;
                }
                if input.response_status.is_some() {
                    rule.response_status = input.response_status;
                }
                if input.response_headers.is_some() {
                    rule.response_headers = input.response_headers;
                }
                if let Some(body) = input.response_body {
                    rule.response_body = body;
                }
                rule.updated_at = Some(now);
                Ok(())
            })
            .await
    }

    pub async fn add_intercept_rule(&self, input: InterceptRuleInput) -> Result<InterceptRule> {
        let path_regex = input.path_regex.unwrap_or_else(|| ".*".to_string());
        validate_path_regex(&path_regex)?;

        let rule = InterceptRule {
            id: new_record_id(),
            name: input.name.unwrap_or_default(),
            host: normalize_rule_host(input.host),
            method: normalize_rule_method(input.method),
            path_regex,
            modify_headers: input.modify_headers,
            modify_body: input.modify_body,
            enabled: input.enabled.unwrap_or(true),
            created_at: Utc::now(),
            updated_at: None,
        };
        info!(rule_id = %rule.id, name = %rule.name, "Intercept rule added");
        self.intercept.insert(rule).await
    }

    pub async fn update_intercept_rule(&self, id: &str, input: InterceptRuleInput) -> Result<InterceptRule> {
        if let Some(pattern) = &input.path_regex {
            validate_path_regex(pattern)?;
        }
        let now = Utc::now();

        self.intercept
            .replace(id, move |rule| {
                if let Some(name) = input.name {
                    rule.name = name;
                }
                if input.host.is_some() {
                    rule.host = normalize_rule_host(input.host);
                }
                if input.method.is_some() {
                    rule.method = normalize_rule_method(input.method);
                }
                if let Some(path_regex) = input.path_regex {
                    rule.path_regex = path_regex;
                }
                if input.modify_headers.is_some() {
                    rule.modify_headers = input.modify_headers;
                }
                if input.modify_body.is_some() {
                    rule.modify_body = input.modify_body;
                }
                if let Some(enabled) = input.enabled {
                    rule.enabled = enabled;
                }
                rule.updated_at = Some(now);
                Ok(())
            })
            .await
    }
}
