use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::queue::JobQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Raw pool, used by the token middleware and health check.
    pub db: SqlitePool,
    pub queue: Arc<JobQueue>,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            queue: Arc::new(JobQueue::new(db.clone())),
            db,
        }
    }
}
