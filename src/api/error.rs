use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::engine::EngineError;

/// Error type for HTTP handlers. Renders as
/// `{"error": {"code", "message", "details"?}}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0}")]
    BadRequest(String),

    #[error("request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

fn classify(err: &EngineError) -> (StatusCode, &'static str, Option<Value>) {
    match err {
        EngineError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            Some(json!({ "entity": entity, "id": id })),
        ),
        EngineError::InsufficientCapacity(shortfalls) => (
            StatusCode::CONFLICT,
            "INSUFFICIENT_CAPACITY",
            Some(json!({ "dates": shortfalls })),
        ),
        EngineError::BlackoutConflict(dates) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "BLACKOUT_CONFLICT",
            Some(json!({ "dates": dates })),
        ),
        EngineError::InvalidState {
            id,
            current,
            attempted,
        } => (
            StatusCode::CONFLICT,
            "INVALID_STATE",
            Some(json!({ "hold_id": id, "current": current, "attempted": attempted })),
        ),
        EngineError::HoldExpired { id, expired_at } => (
            StatusCode::CONFLICT,
            "HOLD_EXPIRED",
            Some(json!({ "hold_id": id, "expired_at": expired_at })),
        ),
        EngineError::Validation(_) | EngineError::LimitExceeded(_) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", None)
        }
        EngineError::OutOfRange { .. } => {
            tracing::error!("capacity invariant breach surfaced to a caller: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
        }
        EngineError::Wal(_) => {
            tracing::error!("{err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::Engine(err) => {
                let (status, code, details) = classify(err);
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    "An internal error occurred".to_string()
                } else {
                    err.to_string()
                };
                (status, code, message, details)
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone(), None),
            ApiError::Timeout => (
                StatusCode::REQUEST_TIMEOUT,
                "TIMEOUT",
                self.to_string(),
                None,
            ),
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let mut error = json!({ "code": code, "message": message });
        if let (Some(details), Some(obj)) = (details, error.as_object_mut()) {
            obj.insert("details".into(), details);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}
