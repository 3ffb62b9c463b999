use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::auth::AuthError;

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or oversized input; nothing was stored.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Storage or other server-side failure. `message` is what the caller
    /// sees; `detail` is only logged unless `expose_detail` is set.
    #[error("{message}: {detail}")]
    Internal {
        message: &'static str,
        detail: String,
        expose_detail: bool,
    },
}

impl ApiError {
    pub fn internal(message: &'static str, err: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            message,
            detail: err.to_string(),
            expose_detail: false,
        }
    }

    /// Like [`ApiError::internal`], but the diagnostic is echoed back. Only
    /// the worker result endpoint uses it.
    pub fn internal_with_detail(message: &'static str, err: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            message,
            detail: err.to_string(),
            expose_detail: true,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Auth(AuthError::MissingToken) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": AuthError::MissingToken.to_string() })),
            )
                .into_response(),
            ApiError::Auth(AuthError::Forbidden) => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": AuthError::Forbidden.to_string() })),
            )
                .into_response(),
            ApiError::Auth(AuthError::Storage(e)) => {
                tracing::error!(error = %e, "Token lookup failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Failed to authenticate worker" })),
                )
                    .into_response()
            }
            ApiError::Internal {
                message,
                detail,
                expose_detail,
            } => {
                tracing::error!(error = %detail, "{}", message);
                let body = if expose_detail {
                    json!({ "error": message, "details": detail })
                } else {
                    json!({ "error": message })
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
