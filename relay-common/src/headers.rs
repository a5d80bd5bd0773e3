//! Header map helpers
//!
//! Captured headers keep the casing the client sent, so every lookup here
//! is ASCII case-insensitive.

use std::collections::HashMap;

pub type HeaderMap = HashMap<String, String>;

/// Look up a header value ignoring ASCII case.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Remove every header named `name`, whatever its casing.
pub fn strip_header(headers: &mut HeaderMap, name: &str) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
}

/// Shallow-merge `overrides` over `base`. An override replaces any existing
/// header with the same name regardless of casing.
pub fn merge_headers(base: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = base.clone();
    for (key, value) in overrides {
        strip_header(&mut merged, key);
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Content-Type of a header map, if any.
pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    header_value(headers, "content-type")
}

/// True for `application/json` and structured `+json` media types.
pub fn is_json_content_type(content_type: &str) -> bool {
    let lowered = content_type.to_ascii_lowercase();
    lowered.contains("application/json") || lowered.contains("+json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_lookup_ignores_case() {
        let h = headers(&[("Content-Type", "application/json")]);
        assert_eq!(content_type(&h), Some("application/json"));
        assert_eq!(header_value(&h, "CONTENT-TYPE"), Some("application/json"));
        assert_eq!(header_value(&h, "accept"), None);
    }

    #[test]
    fn test_strip_removes_all_casings() {
        let mut h = headers(&[("Content-Length", "10"), ("content-length", "10"), ("Accept", "*/*")]);
        strip_header(&mut h, "content-length");
        assert_eq!(h.len(), 1);
        assert!(h.contains_key("Accept"));
    }

    #[test]
    fn test_merge_overrides_existing_casing() {
        let base = headers(&[("Authorization", "Bearer old"), ("Accept", "*/*")]);
        let overrides = headers(&[("authorization", "Bearer new"), ("X-Debug", "1")]);
        let merged = merge_headers(&base, &overrides);

        assert_eq!(merged.len(), 3);
        assert_eq!(header_value(&merged, "Authorization"), Some("Bearer new"));
        assert_eq!(merged.get("X-Debug").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_json_content_types() {
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/html"));
    }
}
