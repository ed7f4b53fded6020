use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::delivery::DeliveryStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid transition: {from} -> {requested}")]
    InvalidTransition {
        from: DeliveryStatus,
        requested: DeliveryStatus,
        allowed: &'static [DeliveryStatus],
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Invalid transitions carry the legal next states so clients can
        // correct themselves without a second round-trip.
        if let AppError::InvalidTransition {
            from,
            requested,
            allowed,
        } = &self
        {
            let body = Json(json!({
                "error": format!("invalid transition: {from} -> {requested}"),
                "allowed": allowed,
            }));
            return (StatusCode::BAD_REQUEST, body).into_response();
        }

        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            AppError::InvalidTransition { .. } => unreachable!("handled above"),
            AppError::Internal(msg) => {
                // Detail goes to the log; the caller gets a generic message.
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
