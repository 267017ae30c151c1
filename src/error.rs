use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Rejections raised while accepting a webhook delivery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("session_id is required")]
    MissingSessionId,

    /// Body could not be decoded into a JSON object. The sender is expected
    /// to retry.
    #[error("Malformed delivery body: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("session_id query parameter is required")]
    MissingSessionId,

    #[error("Invalid poll query: {0}")]
    InvalidQuery(String),
}

/// Endpoint-boundary error. Every variant renders as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("not found")]
    NotFound,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ingest(IngestError::MissingSessionId) => StatusCode::BAD_REQUEST,
            ApiError::Ingest(IngestError::Malformed(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Poll(PollError::MissingSessionId | PollError::InvalidQuery(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
