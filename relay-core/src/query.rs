//! Filtered, paginated reads and maintenance over the captured collections.

use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use relay_common::{
    CapturedRequest, CapturedResponse, InterceptedRequest, ModifiedResponse, Searchable,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::store::{Collection, CollectionStatus, Collections};
use crate::Result;

pub const DEFAULT_PAGE_LIMIT: usize = 20;

/// Token required to wipe every captured collection.
pub const CLEAR_ALL_CONFIRMATION: &str = "YES_DELETE_ALL";

/// Query-string parameters of the paginated listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    /// Exact hostname
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub is_regex: bool,
}

impl PageQuery {
    pub fn new(page: i64, limit: i64) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn page(&self) -> usize {
        self.page.filter(|page| *page >= 1).map(|page| page as usize).unwrap_or(1)
    }

    pub fn limit(&self) -> usize {
        self.limit
            .filter(|limit| *limit >= 1)
            .map(|limit| limit as usize)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref().filter(|host| !host.is_empty())
    }

    fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref().filter(|keyword| !keyword.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

enum KeywordMatcher {
    Pattern(Regex),
    Substring(String),
}

impl KeywordMatcher {
    /// An invalid pattern degrades to a plain substring search.
    fn new(keyword: &str, is_regex: bool) -> Self {
        if is_regex {
            match RegexBuilder::new(keyword).case_insensitive(true).build() {
                Ok(regex) => return KeywordMatcher::Pattern(regex),
                Err(e) => debug!(keyword, error = %e, "Invalid keyword regex, using substring search"),
            }
        }
        KeywordMatcher::Substring(keyword.to_string())
    }

    fn matches<T: Searchable>(&self, record: &T) -> bool {
        record.searchable_fields().iter().any(|field| match self {
            KeywordMatcher::Pattern(regex) => regex.is_match(field),
            KeywordMatcher::Substring(keyword) => field.contains(keyword.as_str()),
        })
    }
}

fn sort_key(timestamp: Option<DateTime<Utc>>) -> i64 {
    timestamp.map(|t| t.timestamp_millis()).unwrap_or(0)
}

fn page_of<T>(items: Vec<T>, page: usize, limit: usize) -> Page<T> {
    let total = items.len();
    let data = items
        .into_iter()
        .skip((page - 1).saturating_mul(limit))
        .take(limit)
        .collect();
    Page {
        data,
        pagination: Pagination {
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        },
    }
}

/// Filter by host and keyword, order newest first, then slice one page.
pub fn paginate<T: Searchable>(records: Vec<T>, query: &PageQuery) -> Page<T> {
    let host = query.host();
    let keyword = query
        .keyword()
        .map(|keyword| KeywordMatcher::new(keyword, query.is_regex));

    let mut filtered: Vec<T> = records
        .into_iter()
        .filter(|record| host.map_or(true, |host| record.hostname().as_deref() == Some(host)))
        .filter(|record| keyword.as_ref().map_or(true, |matcher| matcher.matches(record)))
        .collect();
    filtered.sort_by_key(|record| std::cmp::Reverse(sort_key(record.server_timestamp())));

    page_of(filtered, query.page(), query.limit())
}

fn remove_where<T>(records: &mut Vec<T>, predicate: impl Fn(&T) -> bool) -> usize {
    let before = records.len();
    records.retain(|record| !predicate(record));
    before - records.len()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub deleted_count: usize,
    pub affected_ids: Vec<String>,
    pub cascaded_responses: usize,
    pub cascaded_modified_responses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteItem {
    pub id: String,
    pub success: bool,
    pub deleted_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteReport {
    pub total_deleted: usize,
    pub details: Vec<BatchDeleteItem>,
}

/// Record counts removed from each collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionCounts {
    pub requests: usize,
    pub responses: usize,
    pub modified_responses: usize,
    pub intercepted_requests: usize,
}

impl CollectionCounts {
    pub fn total(&self) -> usize {
        self.requests + self.responses + self.modified_responses + self.intercepted_requests
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHost {
    pub hostname: String,
    pub count: usize,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveHosts {
    pub time_range_hours: u32,
    pub hosts: Vec<ActiveHost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostStats {
    pub hostname: String,
    pub response_count: usize,
    pub modified_count: usize,
    pub methods: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStats {
    pub total_responses: usize,
    pub total_modified_responses: usize,
    pub hosts: Vec<HostStats>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone)]
pub struct QueryService {
    collections: Collections,
}

impl QueryService {
    pub fn new(collections: Collections) -> Self {
        Self { collections }
    }

    pub async fn requests(&self, query: &PageQuery) -> Result<Page<CapturedRequest>> {
        Ok(paginate(self.collections.requests.read_all().await?, query))
    }

    pub async fn responses(&self, query: &PageQuery) -> Result<Page<CapturedResponse>> {
        Ok(paginate(self.collections.responses.read_all().await?, query))
    }

    pub async fn modified_responses(&self, query: &PageQuery) -> Result<Page<ModifiedResponse>> {
        Ok(paginate(self.collections.modified_responses.read_all().await?, query))
    }

    pub async fn intercepted(&self, query: &PageQuery) -> Result<Page<InterceptedRequest>> {
        Ok(paginate(self.collections.intercepted.read_all().await?, query))
    }

    /// Distinct hostnames seen in captured responses, in first-seen order.
    pub async fn hosts(&self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        Ok(self
            .collections
            .responses
            .read_all()
            .await?
            .iter()
            .filter_map(Searchable::hostname)
            .filter(|host| seen.insert(host.clone()))
            .collect())
    }

    /// Hostnames in alphabetical order, optionally filtered by a
    /// case-insensitive keyword.
    pub async fn hosts_paginated(&self, query: &PageQuery) -> Result<Page<String>> {
        let mut hosts = self.hosts().await?;
        if let Some(keyword) = query.keyword() {
            let keyword = keyword.to_lowercase();
            hosts.retain(|host| host.to_lowercase().contains(&keyword));
        }
        hosts.sort();
        Ok(page_of(hosts, query.page(), query.limit()))
    }

    /// Hosts with captured responses in the last `hours`, busiest first.
    pub async fn active_hosts(&self, hours: u32) -> Result<ActiveHosts> {
        let since = Utc::now() - Duration::hours(i64::from(hours));
        let mut hosts: Vec<ActiveHost> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for response in self.collections.responses.read_all().await? {
            let Some(timestamp) = response.server_timestamp.filter(|t| *t >= since) else {
                continue;
            };
            let Some(hostname) = response.hostname() else {
                continue;
            };
            match index.get(&hostname) {
                Some(&i) => {
                    hosts[i].count += 1;
                    hosts[i].last_active = hosts[i].last_active.max(timestamp);
                }
                None => {
                    index.insert(hostname.clone(), hosts.len());
                    hosts.push(ActiveHost {
                        hostname,
                        count: 1,
                        last_active: timestamp,
                    });
                }
            }
        }

        hosts.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(ActiveHosts {
            time_range_hours: hours,
            hosts,
        })
    }

    pub async fn stats(&self) -> Result<TrafficStats> {
        let responses = self.collections.responses.read_all().await?;
        let modified = self.collections.modified_responses.read_all().await?;

        let mut hosts: Vec<HostStats> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for response in &responses {
            let Some(hostname) = response.hostname() else {
                continue;
            };
            let i = *index.entry(hostname.clone()).or_insert_with(|| {
                hosts.push(HostStats {
                    hostname,
                    response_count: 0,
                    modified_count: 0,
                    methods: BTreeMap::new(),
                });
                hosts.len() - 1
            });
            let method = if response.method.is_empty() {
                "UNKNOWN".to_string()
            } else {
                response.method.clone()
            };
            hosts[i].response_count += 1;
            *hosts[i].methods.entry(method).or_default() += 1;
        }
        for record in &modified {
            if let Some(&i) = record.hostname().and_then(|host| index.get(&host)) {
                hosts[i].modified_count += 1;
            }
        }

        Ok(TrafficStats {
            total_responses: responses.len(),
            total_modified_responses: modified.len(),
            hosts,
            last_updated: Utc::now(),
        })
    }

    /// Look a request up by client id or server request id.
    pub async fn find_request(&self, id: &str) -> Result<CapturedRequest> {
        self.collections
            .requests
            .find(|record| record.answers_to(id))
            .await?
            .ok_or_else(|| RelayError::not_found("request", id))
    }

    pub async fn find_response(&self, id: &str) -> Result<CapturedResponse> {
        self.collections
            .responses
            .find(|record| record.answers_to(id))
            .await?
            .ok_or_else(|| RelayError::not_found("response", id))
    }

    /// Most recent modified response recorded for `request_id`.
    pub async fn find_modified_response(&self, request_id: &str) -> Result<ModifiedResponse> {
        self.collections
            .modified_responses
            .read_all()
            .await?
            .into_iter()
            .filter(|record| record.request_id.as_deref() == Some(request_id))
            .max_by_key(|record| sort_key(record.server_timestamp))
            .ok_or_else(|| RelayError::not_found("modified response", request_id))
    }

    async fn remove_requests<P>(&self, predicate: P) -> Result<DeleteSummary>
    where
        P: Fn(&CapturedRequest) -> bool + Send,
    {
        let removed: Vec<CapturedRequest> = self
            .collections
            .requests
            .update(move |records| {
                let (removed, kept): (Vec<_>, Vec<_>) = records.drain(..).partition(|record| predicate(record));
                *records = kept;
                removed
            })
            .await?;

        let mut keys: HashSet<String> = HashSet::new();
        for record in &removed {
            keys.insert(record.id.clone());
            if !record.server_request_id.is_empty() {
                keys.insert(record.server_request_id.clone());
            }
        }
        let correlated = |request_id: &Option<String>| request_id.as_ref().is_some_and(|id| keys.contains(id));

        let (cascaded_responses, cascaded_modified_responses) = if keys.is_empty() {
            (0, 0)
        } else {
            let responses = self
                .collections
                .responses
                .update(|records| remove_where(records, |r| correlated(&r.request_id)))
                .await?;
            let modified = self
                .collections
                .modified_responses
                .update(|records| remove_where(records, |r| correlated(&r.request_id)))
                .await?;
            (responses, modified)
        };

        Ok(DeleteSummary {
            deleted_count: removed.len(),
            affected_ids: removed.into_iter().map(|record| record.id).collect(),
            cascaded_responses,
            cascaded_modified_responses,
        })
    }

    /// Delete a request and the responses correlated with it.
    pub async fn delete_request(&self, id: &str) -> Result<DeleteSummary> {
        let summary = self.remove_requests(|record| record.answers_to(id)).await?;
        if summary.deleted_count == 0 {
            return Err(RelayError::not_found("request", id));
        }
        info!(request_id = id, cascaded = summary.cascaded_responses, "Request deleted");
        Ok(summary)
    }

    pub async fn delete_requests_by_host(&self, hostname: &str) -> Result<DeleteSummary> {
        let summary = self
            .remove_requests(|record| record.hostname().as_deref() == Some(hostname))
            .await?;
        info!(hostname, deleted = summary.deleted_count, "Requests deleted by host");
        Ok(summary)
    }

    pub async fn delete_requests(&self, ids: &[String]) -> Result<BatchDeleteReport> {
        let mut details = Vec::with_capacity(ids.len());
        for id in ids {
            details.push(match self.delete_request(id).await {
                Ok(summary) => BatchDeleteItem {
                    id: id.clone(),
                    success: true,
                    deleted_count: summary.deleted_count,
                    error: None,
                },
                Err(RelayError::NotFound { .. }) => BatchDeleteItem {
                    id: id.clone(),
                    success: false,
                    deleted_count: 0,
                    error: Some("not found".to_string()),
                },
                Err(e) => return Err(e),
            });
        }
        Ok(BatchDeleteReport {
            total_deleted: details.iter().map(|item| item.deleted_count).sum(),
            details,
        })
    }

    async fn remove_responses<P>(&self, predicate: P) -> Result<DeleteSummary>
    where
        P: Fn(&CapturedResponse) -> bool + Send,
    {
        let removed: Vec<String> = self
            .collections
            .responses
            .update(move |records| {
                let (removed, kept): (Vec<_>, Vec<_>) = records.drain(..).partition(|record| predicate(record));
                *records = kept;
                removed.into_iter().map(|record| record.id).collect()
            })
            .await?;
        Ok(DeleteSummary {
            deleted_count: removed.len(),
            affected_ids: removed,
            cascaded_responses: 0,
            cascaded_modified_responses: 0,
        })
    }

    pub async fn delete_response(&self, id: &str) -> Result<DeleteSummary> {
        let summary = self.remove_responses(|record| record.answers_to(id)).await?;
        if summary.deleted_count == 0 {
            return Err(RelayError::not_found("response", id));
        }
        Ok(summary)
    }

    pub async fn delete_responses_by_host(&self, hostname: &str) -> Result<DeleteSummary> {
        let summary = self
            .remove_responses(|record| record.hostname().as_deref() == Some(hostname))
            .await?;
        info!(hostname, deleted = summary.deleted_count, "Responses deleted by host");
        Ok(summary)
    }

    pub async fn delete_responses(&self, ids: &[String]) -> Result<BatchDeleteReport> {
        let mut details = Vec::with_capacity(ids.len());
        for id in ids {
            details.push(match self.delete_response(id).await {
                Ok(summary) => BatchDeleteItem {
                    id: id.clone(),
                    success: true,
                    deleted_count: summary.deleted_count,
                    error: None,
                },
                Err(RelayError::NotFound { .. }) => BatchDeleteItem {
                    id: id.clone(),
                    success: false,
                    deleted_count: 0,
                    error: Some("not found".to_string()),
                },
                Err(e) => return Err(e),
            });
        }
        Ok(BatchDeleteReport {
            total_deleted: details.iter().map(|item| item.deleted_count).sum(),
            details,
        })
    }

    /// Wipe every captured collection. Rules are kept.
    pub async fn clear_all(&self, confirm: &str) -> Result<CollectionCounts> {
        if confirm != CLEAR_ALL_CONFIRMATION {
            return Err(RelayError::Validation(format!(
                "Confirmation required: send confirm={CLEAR_ALL_CONFIRMATION}"
            )));
        }
        let counts = CollectionCounts {
            requests: self.collections.requests.clear().await?,
            responses: self.collections.responses.clear().await?,
            modified_responses: self.collections.modified_responses.clear().await?,
            intercepted_requests: self.collections.intercepted.clear().await?,
        };
        warn!(removed = counts.total(), "All captured data cleared");
        Ok(counts)
    }

    /// Drop records older than `cutoff`. Records without a server timestamp
    /// and requests still held for release are kept.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<CollectionCounts> {
        let counts = CollectionCounts {
            requests: prune(&self.collections.requests, cutoff, |_| true).await?,
            responses: prune(&self.collections.responses, cutoff, |_| true).await?,
            modified_responses: prune(&self.collections.modified_responses, cutoff, |_| true).await?,
            intercepted_requests: prune(&self.collections.intercepted, cutoff, |record| !record.is_pending())
                .await?,
        };
        info!(removed = counts.total(), %cutoff, "Retention sweep finished");
        Ok(counts)
    }

    pub async fn store_status(&self) -> Vec<CollectionStatus> {
        self.collections.status().await
    }
}

async fn prune<T>(collection: &Collection<T>, cutoff: DateTime<Utc>, prunable: fn(&T) -> bool) -> Result<usize>
where
    T: Searchable + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    Ok(collection
        .update(move |records| {
            remove_where(records, |record| {
                prunable(record) && record.server_timestamp().is_some_and(|t| t < cutoff)
            })
        })
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;
    use relay_common::HeaderMap;
    use std::sync::Arc;

    fn request(id: &str, url: &str, minutes_ago: i64) -> CapturedRequest {
        CapturedRequest {
            id: id.to_string(),
            timestamp: None,
            method: "GET".into(),
            url: url.to_string(),
            headers: HeaderMap::new(),
            body: None,
            source: "rewrite_request".into(),
            server_timestamp: Some(Utc::now() - Duration::minutes(minutes_ago)),
            server_request_id: format!("srv-{id}"),
        }
    }

    fn response(id: &str, request_id: &str, url: &str, minutes_ago: i64) -> CapturedResponse {
        CapturedResponse {
            id: id.to_string(),
            request_id: Some(request_id.to_string()),
            url: url.to_string(),
            method: "GET".into(),
            status: 200,
            headers: HeaderMap::new(),
            body: Some("hello world".into()),
            body_size: 11,
            source: "rewrite_response".into(),
            server_timestamp: Some(Utc::now() - Duration::minutes(minutes_ago)),
        }
    }

    async fn service() -> (QueryService, Collections) {
        let collections = Collections::new(Arc::new(MemoryStore::new()));
        (QueryService::new(collections.clone()), collections)
    }

    #[test]
    fn test_second_page_of_twenty_five() {
        // item 0 is the newest
        let records: Vec<CapturedRequest> = (0..25)
            .map(|i| request(&i.to_string(), "https://example.com/", i))
            .collect();
        let page = paginate(records, &PageQuery::new(2, 10));

        let ids: Vec<&str> = page.data.iter().map(|r| r.id.as_str()).collect();
        let expected: Vec<String> = (10..20).map(|i| i.to_string()).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(page.pagination.total_pages, 3);
        assert_eq!(page.pagination.total, 25);
    }

    #[test]
    fn test_invalid_page_and_limit_fall_back() {
        let query = PageQuery::new(0, -5);
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), DEFAULT_PAGE_LIMIT);
    }

    #[test]
    fn test_host_filter_is_exact_and_skips_bad_urls() {
        let records = vec![
            request("a", "https://api.example.com/x", 1),
            request("b", "https://example.com/x", 2),
            request("c", "not a url", 3),
        ];
        let query = PageQuery {
            host: Some("example.com".into()),
            ..Default::default()
        };
        let page = paginate(records, &query);
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].id, "b");
    }

    #[test]
    fn test_invalid_regex_equals_substring_search() {
        let records = vec![
            request("a", "https://example.com/f(x", 1),
            request("b", "https://example.com/plain", 2),
        ];
        let regex_query = PageQuery {
            keyword: Some("(".into()),
            is_regex: true,
            ..Default::default()
        };
        let plain_query = PageQuery {
            keyword: Some("(".into()),
            ..Default::default()
        };
        let by_regex = paginate(records.clone(), &regex_query);
        let by_substring = paginate(records, &plain_query);

        assert_eq!(by_regex.data, by_substring.data);
        assert_eq!(by_regex.data.len(), 1);
        assert_eq!(by_regex.data[0].id, "a");
    }

    #[test]
    fn test_regex_keyword_is_case_insensitive() {
        let records = vec![request("a", "https://example.com/Login", 1)];
        let query = PageQuery {
            keyword: Some("^https://.*/login$".into()),
            is_regex: true,
            ..Default::default()
        };
        assert_eq!(paginate(records, &query).data.len(), 1);
    }

    #[test]
    fn test_missing_timestamp_sorts_last() {
        let mut old = request("legacy", "https://example.com/", 0);
        old.server_timestamp = None;
        let records = vec![old, request("fresh", "https://example.com/", 5)];
        let page = paginate(records, &PageQuery::default());
        assert_eq!(page.data[0].id, "fresh");
    }

    #[tokio::test]
    async fn test_hosts_and_stats() {
        let (service, collections) = service().await;
        for (i, url) in ["https://b.example.com/", "https://a.example.com/", "https://b.example.com/x", "bad"]
            .iter()
            .enumerate()
        {
            collections
                .responses
                .append(&response(&i.to_string(), "r", url, 1))
                .await
                .unwrap();
        }

        assert_eq!(service.hosts().await.unwrap(), vec!["b.example.com", "a.example.com"]);

        let query = PageQuery {
            keyword: Some("A.EXAMPLE".into()),
            ..Default::default()
        };
        let hosts = service.hosts_paginated(&query).await.unwrap();
        assert_eq!(hosts.data, vec!["a.example.com".to_string()]);

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total_responses, 4);
        assert_eq!(stats.hosts[0].hostname, "b.example.com");
        assert_eq!(stats.hosts[0].response_count, 2);
        assert_eq!(stats.hosts[0].methods.get("GET"), Some(&2));

        let active = service.active_hosts(24).await.unwrap();
        assert_eq!(active.hosts[0].hostname, "b.example.com");
        assert_eq!(active.hosts[0].count, 2);
    }

    #[tokio::test]
    async fn test_active_hosts_respects_window() {
        let (service, collections) = service().await;
        collections
            .responses
            .append(&response("old", "r", "https://old.example.com/", 60 * 5))
            .await
            .unwrap();
        collections
            .responses
            .append(&response("new", "r", "https://new.example.com/", 1))
            .await
            .unwrap();

        let active = service.active_hosts(1).await.unwrap();
        assert_eq!(active.hosts.len(), 1);
        assert_eq!(active.hosts[0].hostname, "new.example.com");
    }

    #[tokio::test]
    async fn test_delete_request_cascades() {
        let (service, collections) = service().await;
        collections.requests.append(&request("r1", "https://example.com/", 1)).await.unwrap();
        collections.requests.append(&request("r2", "https://example.com/", 1)).await.unwrap();
        collections
            .responses
            .append(&response("s1", "r1", "https://example.com/", 1))
            .await
            .unwrap();
        collections
            .responses
            .append(&response("s2", "r2", "https://example.com/", 1))
            .await
            .unwrap();

        let summary = service.delete_request("srv-r1").await.unwrap();
        assert_eq!(summary.deleted_count, 1);
        assert_eq!(summary.cascaded_responses, 1);
        assert_eq!(collections.responses.read_all().await.unwrap().len(), 1);

        assert!(matches!(
            service.delete_request("r1").await,
            Err(RelayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_delete_reports_each_id() {
        let (service, collections) = service().await;
        collections.requests.append(&request("r1", "https://example.com/", 1)).await.unwrap();

        let report = service
            .delete_requests(&["r1".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(report.total_deleted, 1);
        assert!(report.details[0].success);
        assert!(!report.details[1].success);
    }

    #[tokio::test]
    async fn test_delete_by_host() {
        let (service, collections) = service().await;
        collections.requests.append(&request("r1", "https://a.com/", 1)).await.unwrap();
        collections.requests.append(&request("r2", "https://b.com/", 1)).await.unwrap();
        collections.responses.append(&response("s1", "r1", "https://a.com/", 1)).await.unwrap();

        let summary = service.delete_requests_by_host("a.com").await.unwrap();
        assert_eq!(summary.affected_ids, vec!["r1".to_string()]);
        assert_eq!(summary.cascaded_responses, 1);

        let summary = service.delete_responses_by_host("b.com").await.unwrap();
        assert_eq!(summary.deleted_count, 0);
    }

    #[tokio::test]
    async fn test_clear_all_requires_confirmation() {
        let (service, collections) = service().await;
        collections.requests.append(&request("r1", "https://a.com/", 1)).await.unwrap();

        assert!(matches!(
            service.clear_all("yes").await,
            Err(RelayError::Validation(_))
        ));
        let counts = service.clear_all(CLEAR_ALL_CONFIRMATION).await.unwrap();
        assert_eq!(counts.requests, 1);
        assert!(collections.requests.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prune_keeps_recent_and_untimestamped() {
        let (service, collections) = service().await;
        let mut legacy = request("legacy", "https://a.com/", 0);
        legacy.server_timestamp = None;
        collections.requests.append(&legacy).await.unwrap();
        collections.requests.append(&request("old", "https://a.com/", 60 * 24 * 10)).await.unwrap();
        collections.requests.append(&request("new", "https://a.com/", 1)).await.unwrap();

        let counts = service
            .prune_older_than(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(counts.requests, 1);

        let ids: Vec<String> = collections
            .requests
            .read_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["legacy".to_string(), "new".to_string()]);
    }

    #[tokio::test]
    async fn test_find_modified_response_not_found() {
        let (service, _) = service().await;
        assert!(matches!(
            service.find_modified_response("r1").await,
            Err(RelayError::NotFound { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_page_slices_are_consistent(total in 0usize..80, page in 1i64..10, limit in 1i64..30) {
            let records: Vec<CapturedRequest> = (0..total)
                .map(|i| request(&i.to_string(), "https://example.com/", i as i64))
                .collect();
            let result = paginate(records, &PageQuery::new(page, limit));

            let (page, limit) = (page as usize, limit as usize);
            let expected_len = total.saturating_sub((page - 1) * limit).min(limit);
            prop_assert_eq!(result.data.len(), expected_len);
            prop_assert_eq!(result.pagination.total_pages, total.div_ceil(limit));
            if let Some(first) = result.data.first() {
                prop_assert_eq!(first.id.clone(), ((page - 1) * limit).to_string());
            }
        }
    }
}
