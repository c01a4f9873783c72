//! HTTP API surface: health, viewer WebSocket, and campaign/donation reads.

pub mod campaigns;
pub mod donations;
pub mod health;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Error type shared by the JSON handlers.
#[derive(Debug)]
pub enum ApiError {
    NotFound(&'static str),
    Validation(String),
    Internal,
}

impl ApiError {
    /// Log the underlying fault and answer with an opaque 500.
    pub fn internal(e: impl std::fmt::Display) -> Self {
        tracing::error!(error = %e, "Request failed");
        ApiError::Internal
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
            ApiError::Validation(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
