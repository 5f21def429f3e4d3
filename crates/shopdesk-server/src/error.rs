//! Mapping from domain errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use shopdesk_store::StoreError;

const OPAQUE_DETAIL: &str = "Internal Server Error";

#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    /// The request body could not be understood.
    BadRequest(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<shopdesk_store::FilterError> for ApiError {
    fn from(e: shopdesk_store::FilterError) -> Self {
        Self::Store(StoreError::MalformedFilter(e))
    }
}

impl ApiError {
    fn status_and_detail(&self) -> (StatusCode, String) {
        match self {
            Self::Store(StoreError::MalformedFilter(e)) => (StatusCode::BAD_REQUEST, e.to_string()),
            Self::Store(StoreError::InvalidInput(msg)) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            Self::Store(StoreError::DuplicateKey(msg)) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            Self::Store(e @ StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, e.to_string()),
            Self::Store(StoreError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Store(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, OPAQUE_DETAIL.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = self.status_and_detail();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
