//! Relay error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use cl_proto::api::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid bearer token, or acting on a resource the caller
    /// is not party to.
    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    /// A 400 with a stable machine-readable code.
    #[error("{code}: {details}")]
    Rejected { code: &'static str, details: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn rejected(code: &'static str, details: impl Into<String>) -> Self {
        ApiError::Rejected {
            code,
            details: details.into(),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: "unauthorized".into(),
                    details: None,
                },
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: "not-found".into(),
                    details: None,
                },
            ),
            ApiError::Rejected { code, details } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: code.into(),
                    details: Some(details),
                },
            ),
            ApiError::Internal(details) => {
                // Operators get the cause via logs, not the wire.
                tracing::error!(details, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "internal".into(),
                        details: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
