//! Capture API: envelopes pushed by the capturing client.
//!
//! These handlers never fail the client. Persistence problems are logged
//! and counted inside the relay; a malformed modify payload is answered
//! with `modified: false` so the client forwards the original response.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use relay_common::{RequestEnvelope, ResponseEnvelope};
use relay_core::{CaptureAck, ModifyReply};
use tracing::{debug, warn};

use crate::http::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/request", post(capture_request))
        .route("/response", post(capture_response))
        .route("/response/modify", post(modify_response))
}

async fn capture_request(
    State(state): State<AppState>,
    Json(envelope): Json<RequestEnvelope>,
) -> Json<CaptureAck> {
    debug!(method = %envelope.method, url = %envelope.url, "Request envelope received");
    Json(state.relay.capture_request(envelope).await)
}

async fn capture_response(
    State(state): State<AppState>,
    Json(envelope): Json<ResponseEnvelope>,
) -> Json<CaptureAck> {
    debug!(url = %envelope.url, status = ?envelope.status, "Response envelope received");
    Json(state.relay.capture_response(envelope).await)
}

async fn modify_response(
    State(state): State<AppState>,
    payload: Result<Json<ResponseEnvelope>, JsonRejection>,
) -> Json<ModifyReply> {
    match payload {
        Ok(Json(envelope)) => Json(state.relay.modify_response(envelope).await),
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Unreadable modify payload, leaving response untouched");
            Json(ModifyReply::failed(rejection.body_text()))
        }
    }
}
