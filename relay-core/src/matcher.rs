//! Rule matching
//!
//! Capture, response and intercept rules are all evaluated the same way:
//! 1. Disabled rules are skipped.
//! 2. Host: `*`, or the hostname contains the rule's host as a substring.
//! 3. Method: `*` (or an empty capture-rule method set), or an exact match
//!    with the uppercased request method.
//! 4. Path: the rule's path regex, compiled case-insensitively, must match
//!    path plus query. Rules with an invalid regex are skipped.
//!
//! Among the survivors the most recently updated rule wins; ties keep the
//! stored order.

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use relay_common::{CaptureRule, InterceptRule, ResponseRule};
use tracing::warn;
use url::Url;

/// The parts of a request that rules look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTarget {
    /// `None` when the URL could not be parsed or has no host
    pub hostname: Option<String>,
    pub method: String,
    pub path_and_query: String,
}

impl MatchTarget {
    pub fn from_url(url: &str, method: &str) -> Self {
        let (hostname, path_and_query) = match Url::parse(url) {
            Ok(parsed) => {
                let mut path = parsed.path().to_string();
                if let Some(query) = parsed.query() {
                    path.push('?');
                    path.push_str(query);
                }
                (parsed.host_str().map(str::to_string), path)
            }
            Err(_) => (None, String::new()),
        };

        Self {
            hostname,
            method: method.to_ascii_uppercase(),
            path_and_query,
        }
    }
}

/// Common view over the three rule kinds.
pub trait MatchRule {
    fn rule_id(&self) -> &str;
    fn is_enabled(&self) -> bool;
    fn host_pattern(&self) -> &str;
    /// `method` is already uppercased.
    fn accepts_method(&self, method: &str) -> bool;
    /// Capture rules carry no path pattern.
    fn path_pattern(&self) -> Option<&str>;
    /// `updated_at`, falling back to `created_at`
    fn recency(&self) -> DateTime<Utc>;
}

/// Selected rule plus how many rules matched in total.
#[derive(Debug)]
pub struct RuleMatch<'a, R> {
    pub rule: &'a R,
    pub candidates: usize,
}

pub fn host_matches(pattern: &str, hostname: Option<&str>) -> bool {
    match hostname {
        Some(hostname) => pattern == "*" || hostname.contains(pattern),
        None => false,
    }
}

fn path_matches<R: MatchRule>(rule: &R, path: &str) -> bool {
    let Some(pattern) = rule.path_pattern() else {
        return true;
    };
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => regex.is_match(path),
        Err(e) => {
            warn!(rule_id = rule.rule_id(), pattern, error = %e, "Skipping rule with invalid path regex");
            false
        }
    }
}

pub fn rule_applies<R: MatchRule>(rule: &R, target: &MatchTarget) -> bool {
    rule.is_enabled()
        && host_matches(rule.host_pattern(), target.hostname.as_deref())
        && rule.accepts_method(&target.method)
        && path_matches(rule, &target.path_and_query)
}

/// Pick the single best rule for `target`, if any.
pub fn best_match<'a, R: MatchRule>(rules: &'a [R], target: &MatchTarget) -> Option<RuleMatch<'a, R>> {
    let mut candidates: Vec<&R> = rules.iter().filter(|rule| rule_applies(*rule, target)).collect();
    // sort_by is stable: equal timestamps keep stored order
    candidates.sort_by(|a, b| b.recency().cmp(&a.recency()));
    let rule = candidates.first().copied()?;
    Some(RuleMatch {
        rule,
        candidates: candidates.len(),
    })
}

/// An empty capture-rule set allows everything; otherwise something must match.
pub fn capture_allowed(rules: &[CaptureRule], target: &MatchTarget) -> bool {
    rules.is_empty() || rules.iter().any(|rule| rule_applies(rule, target))
}

impl MatchRule for CaptureRule {
    fn rule_id(&self) -> &str {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn host_pattern(&self) -> &str {
        &self.host
    }

    fn accepts_method(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m == method)
    }

    fn path_pattern(&self) -> Option<&str> {
        None
    }

    fn recency(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

impl MatchRule for ResponseRule {
    fn rule_id(&self) -> &str {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn host_pattern(&self) -> &str {
        &self.host
    }

    fn accepts_method(&self, method: &str) -> bool {
        self.method == "*" || self.method == method
    }

    fn path_pattern(&self) -> Option<&str> {
        Some(&self.path_regex)
    }

    fn recency(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

impl MatchRule for InterceptRule {
    fn rule_id(&self) -> &str {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn host_pattern(&self) -> &str {
        &self.host
    }

    fn accepts_method(&self, method: &str) -> bool {
        self.method == "*" || self.method == method
    }

    fn path_pattern(&self) -> Option<&str> {
        Some(&self.path_regex)
    }

    fn recency(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}
