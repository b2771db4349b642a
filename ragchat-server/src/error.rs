//! Mapping of engine errors onto HTTP responses.

use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ragchat_retrieval::RagError;
use thiserror::Error;
use tracing::error;

use crate::protocol::ErrorResponse;

/// An error returned by a handler, rendered as `{message, details}`.
#[derive(Debug, Error)]
#[error("{message}: {details}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, details: impl Into<String>) -> Self {
        Self { status, message: message.into(), details: details.into() }
    }

    pub fn bad_request(details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Invalid request", details)
    }
}

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        let (status, message) = match &err {
            RagError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
            RagError::DocumentNotFound(_) => (StatusCode::NOT_FOUND, "Document not found"),
            RagError::DecodeError { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "Document could not be decoded")
            }
            RagError::EmbeddingTimeout { .. } => {
                (StatusCode::GATEWAY_TIMEOUT, "Embedding service timed out")
            }
            RagError::EmbeddingError { .. }
            | RagError::ChunkingError(_)
            | RagError::DimensionMismatch { .. }
            | RagError::IndexInconsistency { .. }
            | RagError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "An error occurred"),
        };
        Self::new(status, message, err.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), "Invalid upload", err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, details = %self.details, "request failed");
        }
        let body = Json(ErrorResponse { message: self.message, details: self.details });
        (self.status, body).into_response()
    }
}
