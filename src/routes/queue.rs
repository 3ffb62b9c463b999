use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::verification::{
    JobListResponse, MessageResponse, RecentJobsResponse, RecentQuery, StatsResponse,
    StatusQuery, VerifyRequest, VerifyResponse, MAX_BATCH_SIZE,
};
use crate::services::queue::{page_bounds, recent_limit};

/// POST /queue/verify — queue a batch of addresses for verification.
pub async fn enqueue(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!(error = %e.body_text(), "Rejected enqueue body");
        ApiError::Validation("Invalid input. Expected array of emails.".to_string())
    })?;

    if let Err(report) = request.validate() {
        tracing::debug!(%report, "Rejected enqueue request");
        let message = if request.emails.is_empty() {
            "Invalid input. Expected array of emails.".to_string()
        } else {
            format!("Maximum {} emails per batch", MAX_BATCH_SIZE)
        };
        return Err(ApiError::Validation(message));
    }

    let outcome = state
        .queue
        .enqueue(&request.emails, request.provider.unwrap_or_default())
        .await
        .map_err(|e| ApiError::internal("Failed to queue emails", e))?;

    Ok(Json(VerifyResponse {
        success: true,
        message: format!("{} emails queued for verification", outcome.queued()),
        inserted: outcome.inserted,
        results: outcome.results,
    }))
}

/// GET /queue/status — paginated listing, newest first.
pub async fn list_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let (limit, offset) = page_bounds(query.limit, query.offset);

    let (data, total) = state
        .queue
        .list(limit, offset)
        .await
        .map_err(|e| ApiError::internal("Failed to fetch status", e))?;

    Ok(Json(JobListResponse {
        success: true,
        data,
        limit,
        offset,
        total,
    }))
}

/// GET /queue/status/recent — bounded most-recent listing for dashboards.
pub async fn recent_status(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<RecentJobsResponse>, ApiError> {
    let data = state
        .queue
        .recent(recent_limit(query.limit))
        .await
        .map_err(|e| ApiError::internal("Failed to fetch recent results", e))?;

    Ok(Json(RecentJobsResponse {
        success: true,
        data,
    }))
}

/// GET /queue/stats — counts by status and result.
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state
        .queue
        .stats()
        .await
        .map_err(|e| ApiError::internal("Failed to fetch stats", e))?;

    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}

/// DELETE /queue/clear — wipe all jobs and history.
pub async fn clear(State(state): State<AppState>) -> Result<Json<MessageResponse>, ApiError> {
    state
        .queue
        .clear()
        .await
        .map_err(|e| ApiError::internal("Failed to clear data", e))?;

    Ok(Json(MessageResponse::ok("All data cleared")))
}
