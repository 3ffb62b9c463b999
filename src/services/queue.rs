use sqlx::SqlitePool;

use crate::db::queries;
use crate::models::job::{
    ClaimedJob, Provider, QueueStats, VerificationJob, VerificationOutcome, WorkerStats,
};
use crate::models::verification::{EmailEntry, EnqueueItemResult, ResultSubmission};

pub const DEFAULT_STATUS_LIMIT: i64 = 100;
pub const MAX_STATUS_LIMIT: i64 = 1000;
pub const DEFAULT_RECENT_LIMIT: i64 = 50;
pub const MAX_RECENT_LIMIT: i64 = 500;

/// Outcome of an enqueue call.
#[derive(Debug)]
pub struct EnqueueOutcome {
    /// Rows actually written; pairs already pending are not counted.
    pub inserted: u64,
    pub results: Vec<EnqueueItemResult>,
}

impl EnqueueOutcome {
    pub fn queued(&self) -> usize {
        self.results.iter().filter(|r| r.is_queued()).count()
    }
}

/// SQLite-backed verification queue.
///
/// The single writer for the queue tables: every state transition goes
/// through here.
pub struct JobQueue {
    db: SqlitePool,
}

impl JobQueue {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Validate each entry and queue the well-formed ones.
    ///
    /// Malformed addresses are reported per item and never stored; they do
    /// not prevent the rest of the batch from being queued.
    pub async fn enqueue(
        &self,
        entries: &[EmailEntry],
        default_provider: Provider,
    ) -> Result<EnqueueOutcome, QueueError> {
        let mut results = Vec::with_capacity(entries.len());
        let mut pairs = Vec::with_capacity(entries.len());

        for entry in entries {
            if let Some(reason) = entry.rejection() {
                results.push(EnqueueItemResult::rejected(&entry.label(), &reason));
                continue;
            }

            let email = entry.email().unwrap_or_default();
            match validate_email(email) {
                Ok(()) => {
                    let provider = entry.provider().unwrap_or(default_provider);
                    pairs.push((email.to_string(), provider));
                    results.push(EnqueueItemResult::queued(email, provider));
                }
                Err(reason) => results.push(EnqueueItemResult::rejected(email, reason)),
            }
        }

        let inserted = queries::enqueue_batch(&self.db, &pairs).await?;
        metrics::counter!("verification_jobs_enqueued_total").increment(inserted);

        tracing::info!(
            requested = entries.len(),
            accepted = pairs.len(),
            inserted = inserted,
            "Queued verification batch"
        );

        Ok(EnqueueOutcome { inserted, results })
    }

    /// Claim the oldest pending job for a worker.
    pub async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let job = queries::claim_next(&self.db).await?;
        if let Some(job) = &job {
            metrics::counter!("verification_jobs_claimed_total").increment(1);
            tracing::info!(
                job_id = job.id,
                email = %job.email,
                provider = %job.provider,
                attempts = job.attempts,
                "Job claimed"
            );
        }
        Ok(job)
    }

    /// Record a verdict and complete the job.
    pub async fn submit(&self, submission: &ResultSubmission) -> Result<(), QueueError> {
        if !queries::submit_result(&self.db, submission).await? {
            return Err(QueueError::JobNotFound(submission.id));
        }

        metrics::counter!(
            "verification_jobs_completed_total",
            "result" => submission.result.as_str()
        )
        .increment(1);

        tracing::info!(
            job_id = submission.id,
            result = %submission.result,
            error_message = submission.error_message.as_deref().unwrap_or(""),
            "Job completed"
        );
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(queries::stats(&self.db).await?)
    }

    pub async fn worker_stats(&self) -> Result<WorkerStats, QueueError> {
        Ok(queries::worker_stats(&self.db).await?)
    }

    /// One page of the full listing plus the total row count.
    pub async fn list(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<VerificationJob>, i64), QueueError> {
        let jobs = queries::list_jobs(&self.db, limit, offset).await?;
        let total = queries::count_jobs(&self.db).await?;
        Ok((jobs, total))
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<VerificationJob>, QueueError> {
        Ok(queries::recent_jobs(&self.db, limit).await?)
    }

    pub async fn export(&self, result: VerificationOutcome) -> Result<Vec<String>, QueueError> {
        Ok(queries::export_emails(&self.db, result).await?)
    }

    pub async fn clear(&self) -> Result<(), QueueError> {
        queries::clear_all(&self.db).await?;
        tracing::warn!("Verification queue and history cleared");
        Ok(())
    }

    /// Check database connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

/// Per-item address check. Normalization is left to the caller.
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    if email.contains('@') {
        Ok(())
    } else {
        Err("Invalid email format")
    }
}

/// Clamp listing parameters to `(limit, offset)` within the allowed bounds.
pub fn page_bounds(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    let limit = limit
        .unwrap_or(DEFAULT_STATUS_LIMIT)
        .clamp(1, MAX_STATUS_LIMIT);
    let offset = offset.unwrap_or(0).max(0);
    (limit, offset)
}

pub fn recent_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_RECENT_LIMIT).clamp(1, MAX_RECENT_LIMIT)
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    JobNotFound(i64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_pool;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("a@x.com").is_ok());
        assert!(validate_email("bad").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(None, None), (DEFAULT_STATUS_LIMIT, 0));
        assert_eq!(page_bounds(Some(5000), Some(-3)), (MAX_STATUS_LIMIT, 0));
        assert_eq!(page_bounds(Some(0), Some(20)), (1, 20));
        assert_eq!(recent_limit(None), DEFAULT_RECENT_LIMIT);
        assert_eq!(recent_limit(Some(10_000)), MAX_RECENT_LIMIT);
    }

    #[tokio::test]
    async fn test_enqueue_reports_rejected_items() {
        let (pool, _dir) = temp_pool(1).await;
        let queue = JobQueue::new(pool);

        let entries = vec![
            EmailEntry::Address("a@x.com".to_string()),
            EmailEntry::Address("bad".to_string()),
            EmailEntry::Detailed {
                email: "b@y.com".to_string(),
                provider: Some(Provider::Gmail),
            },
        ];
        let outcome = queue.enqueue(&entries, Provider::Office365).await.unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.queued(), 2);
        assert_eq!(outcome.results[0], EnqueueItemResult::queued("a@x.com", Provider::Office365));
        assert_eq!(outcome.results[1], EnqueueItemResult::rejected("bad", "Invalid email format"));
        assert_eq!(outcome.results[2].provider, Some(Provider::Gmail));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_unusable_entries_per_item() {
        let (pool, _dir) = temp_pool(1).await;
        let queue = JobQueue::new(pool);

        let entries = vec![
            EmailEntry::Address("a@x.com".to_string()),
            EmailEntry::Other(serde_json::json!(42)),
            EmailEntry::Other(serde_json::json!({ "email": "c@z.com", "provider": "yahoo" })),
        ];
        let outcome = queue.enqueue(&entries, Provider::Office365).await.unwrap();

        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.results[1], EnqueueItemResult::rejected("42", "Invalid email format"));
        assert_eq!(
            outcome.results[2],
            EnqueueItemResult::rejected("c@z.com", "Unsupported provider 'yahoo'")
        );
    }

    #[tokio::test]
    async fn test_submit_unknown_job_is_not_found() {
        let (pool, _dir) = temp_pool(1).await;
        let queue = JobQueue::new(pool);

        let err = queue
            .submit(&ResultSubmission {
                id: 99,
                result: VerificationOutcome::Valid,
                error_message: None,
                details: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::JobNotFound(99)));
    }
}
