use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sqlx::SqlitePool;

use crate::app_state::AppState;
use crate::db::token_queries;
use crate::error::ApiError;
use crate::models::token::ApiToken;

/// Header carrying the worker credential.
pub const WORKER_TOKEN_HEADER: &str = "x-worker-token";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("API token required")]
    MissingToken,

    #[error("Invalid or inactive API token")]
    Forbidden,

    #[error("Token lookup failed: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Validate a worker token.
///
/// An absent token is `MissingToken`. A token that is present but blank,
/// unknown or revoked is `Forbidden`. On success `last_used_at` is
/// refreshed; failing to do so is logged and does not reject the request.
pub async fn authenticate(pool: &SqlitePool, token: Option<&str>) -> Result<ApiToken, AuthError> {
    let token = token.map(str::trim).ok_or(AuthError::MissingToken)?;
    if token.is_empty() {
        return Err(AuthError::Forbidden);
    }

    let record = match token_queries::find_token(pool, token).await? {
        Some(record) if record.is_active => record,
        _ => return Err(AuthError::Forbidden),
    };

    if let Err(e) = token_queries::touch_token(pool, record.id).await {
        tracing::warn!(token_id = record.id, error = %e, "Failed to update token last_used_at");
    }

    Ok(record)
}

/// Middleware guarding the worker routes.
pub async fn require_worker_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(WORKER_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    match authenticate(&state.db, token.as_deref()).await {
        Ok(record) => {
            tracing::debug!(token_id = record.id, path = %req.uri().path(), "Worker authenticated");
            next.run(req).await
        }
        Err(e) => {
            metrics::counter!("worker_auth_failures_total").increment(1);
            tracing::warn!(path = %req.uri().path(), error = %e, "Rejected worker request");
            ApiError::from(e).into_response()
        }
    }
}
