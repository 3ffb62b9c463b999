use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::verification::{
    MessageResponse, NextJobResponse, ResultSubmission, WorkerResultRequest, WorkerStatsResponse,
};
use crate::services::queue::QueueError;

/// GET /worker/next — claim the oldest pending job, if any.
pub async fn next_job(State(state): State<AppState>) -> Result<Json<NextJobResponse>, ApiError> {
    let job = state
        .queue
        .claim()
        .await
        .map_err(|e| ApiError::internal("Failed to fetch next job", e))?;

    Ok(Json(NextJobResponse { success: true, job }))
}

/// POST /worker/result — record a worker's verdict.
pub async fn submit_result(
    State(state): State<AppState>,
    payload: Result<Json<WorkerResultRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let submission = ResultSubmission::try_from(request).map_err(ApiError::Validation)?;

    match state.queue.submit(&submission).await {
        Ok(()) => Ok(Json(MessageResponse::ok("Result submitted"))),
        Err(QueueError::JobNotFound(id)) => Err(ApiError::NotFound(format!("Job {} not found", id))),
        Err(e) => Err(ApiError::internal_with_detail("Failed to submit result", e)),
    }
}

/// GET /worker/stats — job counts for operational monitoring.
pub async fn worker_stats(
    State(state): State<AppState>,
) -> Result<Json<WorkerStatsResponse>, ApiError> {
    let stats = state
        .queue
        .worker_stats()
        .await
        .map_err(|e| ApiError::internal("Failed to fetch stats", e))?;

    Ok(Json(WorkerStatsResponse {
        success: true,
        stats,
    }))
}
