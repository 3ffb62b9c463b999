use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the gateway's counters.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "verification_jobs_enqueued_total",
        "Jobs inserted into the queue (duplicates of pending jobs excluded)"
    );
    metrics::describe_counter!(
        "verification_jobs_claimed_total",
        "Jobs handed to workers"
    );
    metrics::describe_counter!(
        "verification_jobs_completed_total",
        "Results recorded, labelled by result"
    );
    metrics::describe_counter!(
        "worker_auth_failures_total",
        "Worker requests rejected by token authentication"
    );
}

/// GET /metrics — Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
