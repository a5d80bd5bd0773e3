//! Response rewriting by response rules.

use chrono::Utc;
use relay_common::headers::{content_type, is_json_content_type};
use relay_common::ids::new_record_id;
use relay_common::{CapturedResponse, HeaderMap, ModifiedResponse, ResponseRule};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::capture::persist;
use crate::config::RelayFlags;
use crate::matcher::{best_match, MatchTarget};
use crate::metrics::Metrics;
use crate::rules::RuleStore;
use crate::store::Collection;

/// Response handed back to the client in place of the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// Render a rule's body template against the original response.
///
/// JSON-looking templates on JSON responses are parsed and re-serialized;
/// anything that does not parse is returned verbatim.
pub fn render_body(template: &str, original: &CapturedResponse) -> String {
    let json_response = content_type(&original.headers).is_some_and(is_json_content_type);
    let trimmed = template.trim_start();
    if json_response && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
        if let Ok(value) = serde_json::from_str::<Value>(template) {
            return value.to_string();
        }
    }
    template.to_string()
}

pub fn derive_response(rule: &ResponseRule, original: &CapturedResponse) -> DerivedResponse {
    DerivedResponse {
        status: rule.response_status.unwrap_or(original.status),
        headers: rule
            .response_headers
            .clone()
            .unwrap_or_else(|| original.headers.clone()),
        body: render_body(&rule.response_body, original),
    }
}

#[derive(Clone)]
pub struct ModificationEngine {
    flags: Arc<RelayFlags>,
    rules: Arc<RuleStore>,
    modified: Collection<ModifiedResponse>,
    metrics: Arc<Metrics>,
}

impl ModificationEngine {
    pub fn new(
        flags: Arc<RelayFlags>,
        rules: Arc<RuleStore>,
        modified: Collection<ModifiedResponse>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            flags,
            rules,
            modified,
            metrics,
        }
    }

    /// Rewrite `response` with the best matching response rule, if any.
    pub async fn apply_response_rules(&self, response: &CapturedResponse) -> Option<DerivedResponse> {
        let rules = self.rules.response_rules().await;
        let target = MatchTarget::from_url(&response.url, &response.method);
        let Some(selected) = best_match(&rules, &target) else {
            debug!(url = %response.url, "No response rule matched");
            return None;
        };

        let rule = selected.rule;
        let derived = derive_response(rule, response);
        info!(
            url = %response.url,
            rule_id = %rule.id,
            rule_name = %rule.name,
            candidates = selected.candidates,
            "Response modified"
        );
        Metrics::incr(&self.metrics.responses_modified);

        if self.flags.capture_enabled() {
            let record = ModifiedResponse {
                id: new_record_id(),
                request_id: response.request_id.clone().or_else(|| Some(response.id.clone())),
                original_url: response.url.clone(),
                method: response.method.clone(),
                status: derived.status,
                headers: derived.headers.clone(),
                body_size: derived.body.len(),
                body: derived.body.clone(),
                matched_rule: rule.id.clone(),
                rule_name: rule.name.clone(),
                matched_rules_count: selected.candidates,
                server_timestamp: Some(Utc::now()),
            };
            persist(&self.modified, record, &self.metrics).await;
        }

        Some(derived)
    }
}
