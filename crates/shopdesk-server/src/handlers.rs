//! Route handlers. Store calls are synchronous and short; they run inline.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use shopdesk_core::case::camel_case_value;
use shopdesk_core::ids::EntityId;
use shopdesk_messenger::webhook::{verify_subscription, Verification};
use shopdesk_messenger::WebhookOutcome;
use shopdesk_store::items::{ItemCreate, ItemUpdate};
use shopdesk_store::{FilterParams, FilterQuery};
use tracing::{error, warn};

use crate::error::ApiError;
use crate::server::AppState;

type ApiResult = Result<Json<Value>, ApiError>;

/// Serialize a response body with camelCase keys.
fn camel_json(value: &impl Serialize) -> ApiResult {
    serde_json::to_value(value)
        .map(|v| Json(camel_case_value(v)))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Parse an optional JSON object body. An empty body is an empty object.
fn object_body(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ApiError::BadRequest(format!("expected a JSON object, got {other}"))),
        Err(e) => Err(ApiError::BadRequest(e.to_string())),
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

// ── Items ────────────────────────────────────────────────────────────────

pub async fn list_items(State(state): State<AppState>, Query(query): Query<FilterQuery>) -> ApiResult {
    let params = FilterParams::from_query(&query)?;
    camel_json(&state.items.get_multi_with_count(&params)?)
}

pub async fn create_item(State(state): State<AppState>, Json(body): Json<ItemCreate>) -> ApiResult {
    camel_json(&state.items.create(&body)?)
}

pub async fn get_item(State(state): State<AppState>, Path(id): Path<EntityId>) -> ApiResult {
    camel_json(&state.items.get_or_fail(&id)?)
}

pub async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Json(body): Json<ItemUpdate>,
) -> ApiResult {
    let item = state.items.get_or_fail(&id)?;
    camel_json(&state.items.update(&item, &body)?)
}

pub async fn patch_item(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Json(changes): Json<Map<String, Value>>,
) -> ApiResult {
    let item = state.items.get_or_fail(&id)?;
    camel_json(&state.items.patch(&item, &changes)?)
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub hard: bool,
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult {
    let removed = if query.hard {
        state.items.delete(&id)?
    } else {
        // Removing twice is a 404, not a second tombstone.
        state.items.get_or_fail(&id)?;
        state.items.remove(&id)?
    };
    camel_json(&removed)
}

pub async fn clone_item(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    body: Bytes,
) -> ApiResult {
    let overrides = object_body(&body)?;
    let item = state.items.get_or_fail(&id)?;
    camel_json(&state.items.clone_entity(&item, &overrides)?)
}

// ── Users ────────────────────────────────────────────────────────────────

pub async fn list_users(State(state): State<AppState>, Query(query): Query<FilterQuery>) -> ApiResult {
    let params = FilterParams::from_query(&query)?;
    camel_json(&state.users.get_multi_with_count(&params)?)
}

pub async fn get_user(State(state): State<AppState>, Path(id): Path<EntityId>) -> ApiResult {
    camel_json(&state.users.get_or_fail(&id)?)
}

// ── Webhook ──────────────────────────────────────────────────────────────

pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let verification = verify_subscription(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
        &state.verify_token,
    );
    match verification {
        Verification::Accepted(challenge) => (StatusCode::OK, challenge).into_response(),
        Verification::Forbidden => {
            warn!("webhook verification token mismatch");
            (StatusCode::FORBIDDEN, Json(json!({ "detail": "Forbidden" }))).into_response()
        }
        Verification::Missing => {
            (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" }))).into_response()
        }
    }
}

fn opaque_failure() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": "Internal Server Error" })),
    )
        .into_response()
}

/// Anything other than a well-formed `page` event gets an opaque 500,
/// including a body that is not JSON at all.
pub async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "webhook body is not JSON");
            return opaque_failure();
        }
    };
    match state.webhook.handle(payload).await {
        Ok(WebhookOutcome::Received) => {
            (StatusCode::OK, Json(json!({ "status": "EVENT_RECEIVED" }))).into_response()
        }
        Ok(WebhookOutcome::Invalid) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "status": "Invalid request" }))).into_response()
        }
        Err(e) => {
            error!(error = %e, "webhook handling failed");
            opaque_failure()
        }
    }
}
