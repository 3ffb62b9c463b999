use axum::routing::{delete, get, post};
use axum::{middleware, Router};

use crate::app_state::AppState;
use crate::services::auth::require_worker_token;

pub mod export;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod worker;

/// Build the gateway API: client-facing queue routes plus the token-guarded
/// worker routes.
pub fn api_router(state: AppState) -> Router {
    let worker_routes = Router::new()
        .route("/worker/next", get(worker::next_job))
        .route("/worker/result", post(worker::submit_result))
        .route("/worker/stats", get(worker::worker_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_worker_token,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/queue/verify", post(queue::enqueue))
        .route("/queue/status", get(queue::list_status))
        .route("/queue/status/recent", get(queue::recent_status))
        .route("/queue/stats", get(queue::stats))
        .route("/queue/clear", delete(queue::clear))
        .route("/export/{kind}", get(export::export_emails))
        .merge(worker_routes)
        .with_state(state)
}
