//! Unified application error type following the OpenAI error format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::codec::CodecError;
use crate::input::InputError;
use crate::store::StoreError;
use crate::upstream::UpstreamError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The upstream answered with an error; its status, type, and message
    /// are passed through to the client.
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        status: u16,
        error_type: String,
        message: String,
    },

    #[error("Upstream unreachable: {0}")]
    UpstreamTransport(String),

    #[error("Database error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// OpenAI-compatible error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    message: String,
    r#type: String,
    code: Option<String>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Unauthorized(_)
            | Self::BadRequest(_)
            | Self::NotFound(_)
            | Self::MethodNotAllowed(_) => "invalid_request_error",
            Self::Upstream { error_type, .. } => error_type,
            Self::UpstreamTransport(_) => "upstream_error",
            Self::Store(_) | Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            // Upstream messages are passed through without our prefix.
            Self::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let body = ErrorResponse {
            error: ErrorDetail {
                message,
                r#type: self.error_type().to_string(),
                code: status.canonical_reason().map(String::from),
            },
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<InputError> for AppError {
    fn from(err: InputError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Database error");
        Self::Store(err.to_string())
    }
}

impl From<CodecError> for AppError {
    fn from(err: CodecError) -> Self {
        tracing::error!(error = %err, "Cached vector failed to decode");
        Self::Internal(format!("cached vector is malformed: {err}"))
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Api {
                status,
                error_type,
                message,
                ..
            } => Self::Upstream {
                status,
                error_type,
                message,
            },
            UpstreamError::Transport(e) => Self::UpstreamTransport(e.to_string()),
        }
    }
}
