//! Admin API mounted under `/admin`

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{delete, get, patch, post},
    Json, Router,
};
use relay_common::{
    CaptureRule, CapturedRequest, CapturedResponse, InterceptRule, InterceptRuleInput,
    InterceptedRequest, ModifiedResponse, NewCaptureRule, ResponseRule, ResponseRuleInput,
};
use relay_core::{
    ActiveHosts, BatchDeleteReport, BatchReleaseItem, CollectionCounts, CollectionStatus,
    DeleteSummary, Page, PageQuery, ReleaseOutcome, ToggleStatus, TrafficStats,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::http::AppState;

const DEFAULT_ACTIVE_HOURS: u32 = 24;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/capture-status", get(capture_status).post(set_capture_status))
        .route("/intercept-status", get(intercept_status).post(set_intercept_status))
        .route(
            "/capture-rules",
            get(list_capture_rules)
                .post(add_capture_rule)
                .delete(clear_capture_rules),
        )
        .route("/capture-rules/:id", delete(delete_capture_rule))
        .route("/capture-rules/:id/enable", patch(enable_capture_rule))
        .route("/capture-rules/:id/disable", patch(disable_capture_rule))
        .route("/response-rules", get(list_response_rules).post(add_response_rule))
        .route(
            "/response-rules/:id",
            get(get_response_rule)
                .put(update_response_rule)
                .delete(delete_response_rule),
        )
        .route("/response-rules/:id/status", patch(set_response_rule_status))
        .route("/intercept-rules", get(list_intercept_rules).post(add_intercept_rule))
        .route(
            "/intercept-rules/:id",
            get(get_intercept_rule)
                .put(update_intercept_rule)
                .delete(delete_intercept_rule),
        )
        .route("/intercept-rules/:id/status", patch(set_intercept_rule_status))
        .route("/requests-paginated", get(requests_paginated))
        .route("/responses-paginated", get(responses_paginated))
        .route("/modified-responses-paginated", get(modified_responses_paginated))
        .route("/intercepted-paginated", get(intercepted_paginated))
        .route("/requests/batch", delete(delete_requests_batch))
        .route("/requests/:id", get(get_request).delete(delete_request))
        .route("/responses/batch", delete(delete_responses_batch))
        .route("/responses/:id", get(get_response).delete(delete_response))
        .route("/modified-responses/:request_id", get(get_modified_response))
        .route("/hosts", get(list_hosts))
        .route("/hosts-paginated", get(hosts_paginated))
        .route("/hosts/active", get(active_hosts))
        .route("/hosts/:hostname/requests", delete(delete_host_requests))
        .route("/hosts/:hostname/responses", delete(delete_host_responses))
        .route("/all-data", delete(clear_all_data))
        .route("/stats", get(stats))
        .route("/status", get(store_status))
        .route("/intercepted", get(list_intercepted))
        .route("/intercepted/pending", get(list_pending))
        .route("/intercepted/release", post(release_batch))
        .route("/intercepted/:id", get(get_intercepted))
        .route("/intercepted/:id/release", post(release_one))
}

#[derive(Debug, Deserialize)]
pub struct EnabledBody {
    pub enabled: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfirmBody {
    #[serde(default)]
    pub confirm: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdsBody {
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct HoursQuery {
    pub hours: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ToggleReply {
    pub success: bool,
    pub message: &'static str,
    pub status: ToggleStatus,
}

#[derive(Debug, Serialize)]
pub struct RuleReply<T> {
    pub success: bool,
    pub rule: T,
}

impl<T> RuleReply<T> {
    fn ok(rule: T) -> Json<Self> {
        Json(Self { success: true, rule })
    }
}

#[derive(Debug, Serialize)]
pub struct Done<T> {
    pub success: bool,
    #[serde(flatten)]
    pub result: T,
}

impl<T> Done<T> {
    fn ok(result: T) -> Json<Self> {
        Json(Self {
            success: true,
            result,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedRules {
    pub deleted_count: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchRelease {
    pub success: bool,
    pub results: Vec<BatchReleaseItem>,
}

#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub collections: Vec<CollectionStatus>,
    pub capture: ToggleStatus,
    pub intercept: ToggleStatus,
}

// Status toggles

async fn capture_status(State(state): State<AppState>) -> Json<ToggleStatus> {
    Json(state.relay.capture_status())
}

async fn set_capture_status(
    State(state): State<AppState>,
    payload: Result<Json<EnabledBody>, JsonRejection>,
) -> ApiResult<ToggleReply> {
    let Json(body) = payload?;
    let status = state.relay.set_capture_enabled(body.enabled);
    Ok(Json(ToggleReply {
        success: true,
        message: if body.enabled { "Capture enabled" } else { "Capture paused" },
        status,
    }))
}

async fn intercept_status(State(state): State<AppState>) -> Json<ToggleStatus> {
    Json(state.relay.intercept_status())
}

async fn set_intercept_status(
    State(state): State<AppState>,
    payload: Result<Json<EnabledBody>, JsonRejection>,
) -> ApiResult<ToggleReply> {
    let Json(body) = payload?;
    let status = state.relay.set_intercept_enabled(body.enabled);
    Ok(Json(ToggleReply {
        success: true,
        message: if body.enabled { "Interception enabled" } else { "Interception paused" },
        status,
    }))
}

// Capture rules

async fn list_capture_rules(State(state): State<AppState>) -> Json<Vec<CaptureRule>> {
    Json(state.relay.rules().capture_rules().await.to_vec())
}

async fn add_capture_rule(
    State(state): State<AppState>,
    payload: Result<Json<NewCaptureRule>, JsonRejection>,
) -> ApiResult<RuleReply<CaptureRule>> {
    let Json(input) = payload?;
    Ok(RuleReply::ok(state.relay.rules().add_capture_rule(input).await?))
}

async fn clear_capture_rules(
    State(state): State<AppState>,
    payload: Option<Json<ConfirmBody>>,
) -> ApiResult<Done<ClearedRules>> {
    let confirm = payload.map(|Json(body)| body.confirm).unwrap_or_default();
    let deleted_count = state.relay.rules().clear_capture_rules(&confirm).await?;
    Ok(Done::ok(ClearedRules { deleted_count }))
}

async fn delete_capture_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RuleReply<CaptureRule>> {
    Ok(RuleReply::ok(state.relay.rules().capture().delete(&id).await?))
}

async fn enable_capture_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RuleReply<CaptureRule>> {
    Ok(RuleReply::ok(state.relay.rules().capture().set_enabled(&id, true).await?))
}

async fn disable_capture_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RuleReply<CaptureRule>> {
    Ok(RuleReply::ok(state.relay.rules().capture().set_enabled(&id, false).await?))
}

// Response rules

async fn list_response_rules(State(state): State<AppState>) -> Json<Vec<ResponseRule>> {
    Json(state.relay.rules().response_rules().await.to_vec())
}

async fn get_response_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ResponseRule> {
    Ok(Json(state.relay.rules().response().get(&id).await?))
}

async fn add_response_rule(
    State(state): State<AppState>,
    payload: Result<Json<ResponseRuleInput>, JsonRejection>,
) -> ApiResult<RuleReply<ResponseRule>> {
    let Json(input) = payload?;
    Ok(RuleReply::ok(state.relay.rules().add_response_rule(input).await?))
}

async fn update_response_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ResponseRuleInput>, JsonRejection>,
) -> ApiResult<RuleReply<ResponseRule>> {
    let Json(input) = payload?;
    Ok(RuleReply::ok(state.relay.rules().update_response_rule(&id, input).await?))
}

async fn delete_response_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RuleReply<ResponseRule>> {
    Ok(RuleReply::ok(state.relay.rules().response().delete(&id).await?))
}

async fn set_response_rule_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<EnabledBody>, JsonRejection>,
) -> ApiResult<RuleReply<ResponseRule>> {
    let Json(body) = payload?;
    let rule = state.relay.rules().response().set_enabled(&id, body.enabled).await?;
    Ok(RuleReply::ok(rule))
}

// Intercept rules

async fn list_intercept_rules(State(state): State<AppState>) -> Json<Vec<InterceptRule>> {
    Json(state.relay.rules().intercept_rules().await.to_vec())
}

async fn get_intercept_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<InterceptRule> {
    Ok(Json(state.relay.rules().intercept().get(&id).await?))
}

async fn add_intercept_rule(
    State(state): State<AppState>,
    payload: Result<Json<InterceptRuleInput>, JsonRejection>,
) -> ApiResult<RuleReply<InterceptRule>> {
    let Json(input) = payload?;
    Ok(RuleReply::ok(state.relay.rules().add_intercept_rule(input).await?))
}

async fn update_intercept_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<InterceptRuleInput>, JsonRejection>,
) -> ApiResult<RuleReply<InterceptRule>> {
    let Json(input) = payload?;
    Ok(RuleReply::ok(state.relay.rules().update_intercept_rule(&id, input).await?))
}

async fn delete_intercept_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<RuleReply<InterceptRule>> {
    Ok(RuleReply::ok(state.relay.rules().intercept().delete(&id).await?))
}

async fn set_intercept_rule_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<EnabledBody>, JsonRejection>,
) -> ApiResult<RuleReply<InterceptRule>> {
    let Json(body) = payload?;
    let rule = state.relay.rules().intercept().set_enabled(&id, body.enabled).await?;
    Ok(RuleReply::ok(rule))
}

// Paginated listings

async fn requests_paginated(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<CapturedRequest>> {
    Ok(Json(state.relay.query().requests(&query).await?))
}

async fn responses_paginated(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<CapturedResponse>> {
    Ok(Json(state.relay.query().responses(&query).await?))
}

async fn modified_responses_paginated(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<ModifiedResponse>> {
    Ok(Json(state.relay.query().modified_responses(&query).await?))
}

async fn intercepted_paginated(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<InterceptedRequest>> {
    Ok(Json(state.relay.query().intercepted(&query).await?))
}

// Records

async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CapturedRequest> {
    Ok(Json(state.relay.query().find_request(&id).await?))
}

async fn delete_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Done<DeleteSummary>> {
    Ok(Done::ok(state.relay.query().delete_request(&id).await?))
}

async fn delete_requests_batch(
    State(state): State<AppState>,
    payload: Result<Json<IdsBody>, JsonRejection>,
) -> ApiResult<Done<BatchDeleteReport>> {
    let Json(body) = payload?;
    if body.ids.is_empty() {
        return Err(ApiError::bad_request("ids must be a non-empty array"));
    }
    Ok(Done::ok(state.relay.query().delete_requests(&body.ids).await?))
}

async fn get_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CapturedResponse> {
    Ok(Json(state.relay.query().find_response(&id).await?))
}

async fn delete_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Done<DeleteSummary>> {
    Ok(Done::ok(state.relay.query().delete_response(&id).await?))
}

async fn delete_responses_batch(
    State(state): State<AppState>,
    payload: Result<Json<IdsBody>, JsonRejection>,
) -> ApiResult<Done<BatchDeleteReport>> {
    let Json(body) = payload?;
    if body.ids.is_empty() {
        return Err(ApiError::bad_request("ids must be a non-empty array"));
    }
    Ok(Done::ok(state.relay.query().delete_responses(&body.ids).await?))
}

async fn get_modified_response(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> ApiResult<ModifiedResponse> {
    Ok(Json(state.relay.query().find_modified_response(&request_id).await?))
}

async fn delete_host_requests(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> ApiResult<Done<DeleteSummary>> {
    Ok(Done::ok(state.relay.query().delete_requests_by_host(&hostname).await?))
}

async fn delete_host_responses(
    State(state): State<AppState>,
    Path(hostname): Path<String>,
) -> ApiResult<Done<DeleteSummary>> {
    Ok(Done::ok(state.relay.query().delete_responses_by_host(&hostname).await?))
}

async fn clear_all_data(
    State(state): State<AppState>,
    payload: Option<Json<ConfirmBody>>,
) -> ApiResult<Done<CollectionCounts>> {
    let confirm = payload.map(|Json(body)| body.confirm).unwrap_or_default();
    let counts = state.relay.query().clear_all(&confirm).await?;
    info!(removed = counts.total(), "All data cleared via admin API");
    Ok(Done::ok(counts))
}

// Hosts and stats

async fn list_hosts(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(Json(state.relay.query().hosts().await?))
}

async fn hosts_paginated(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Page<String>> {
    Ok(Json(state.relay.query().hosts_paginated(&query).await?))
}

async fn active_hosts(
    State(state): State<AppState>,
    Query(query): Query<HoursQuery>,
) -> ApiResult<ActiveHosts> {
    let hours = query.hours.unwrap_or(DEFAULT_ACTIVE_HOURS);
    Ok(Json(state.relay.query().active_hosts(hours).await?))
}

async fn stats(State(state): State<AppState>) -> ApiResult<TrafficStats> {
    Ok(Json(state.relay.query().stats().await?))
}

async fn store_status(State(state): State<AppState>) -> Json<StoreStatus> {
    Json(StoreStatus {
        collections: state.relay.query().store_status().await,
        capture: state.relay.capture_status(),
        intercept: state.relay.intercept_status(),
    })
}

// Interception

async fn list_intercepted(State(state): State<AppState>) -> ApiResult<Vec<InterceptedRequest>> {
    Ok(Json(state.relay.interception().list().await?))
}

async fn list_pending(State(state): State<AppState>) -> ApiResult<Vec<InterceptedRequest>> {
    Ok(Json(state.relay.interception().list_pending().await?))
}

async fn get_intercepted(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<InterceptedRequest> {
    Ok(Json(state.relay.interception().get(&id).await?))
}

async fn release_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Done<ReleaseOutcome>> {
    Ok(Done::ok(state.relay.interception().release(&id).await?))
}

async fn release_batch(
    State(state): State<AppState>,
    payload: Result<Json<IdsBody>, JsonRejection>,
) -> ApiResult<BatchRelease> {
    let Json(body) = payload?;
    if body.ids.is_empty() {
        return Err(ApiError::bad_request("ids must be a non-empty array"));
    }
    let results = state.relay.interception().release_many(body.ids).await;
    Ok(Json(BatchRelease {
        success: results.iter().all(|item| item.success),
        results,
    }))
}
