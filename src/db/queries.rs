use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;

use crate::models::job::{
    ClaimedJob, JobStatus, Provider, QueueStats, VerificationJob, VerificationOutcome, WorkerStats,
};
use crate::models::verification::ResultSubmission;

/// SQLite's default ceiling on bound parameters per statement.
pub const SQLITE_MAX_BIND_PARAMS: usize = 999;

/// Parameters bound per inserted row: email, provider, status.
const BINDS_PER_ROW: usize = 3;

/// Rows per multi-row INSERT (300 × 3 = 900 parameters).
pub const INSERT_CHUNK_SIZE: usize = 300;

const _: () = assert!(INSERT_CHUNK_SIZE * BINDS_PER_ROW <= SQLITE_MAX_BIND_PARAMS);

/// Insert pending jobs, ignoring pairs that are already waiting in the queue.
///
/// Rows are written in chunks of [`INSERT_CHUNK_SIZE`] inside one
/// transaction. Returns the number of rows actually inserted.
pub async fn enqueue_batch(
    pool: &SqlitePool,
    pairs: &[(String, Provider)],
) -> Result<u64, sqlx::Error> {
    if pairs.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for chunk in pairs.chunks(INSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR IGNORE INTO verification_queue (email, provider, status) ");
        builder.push_values(chunk, |mut row, (email, provider)| {
            row.push_bind(email.as_str())
                .push_bind(provider.as_str())
                .push_bind(JobStatus::Pending.as_str());
        });

        inserted += builder.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Atomically claim the oldest pending job.
///
/// Selection and the move to `processing` happen in a single UPDATE, which
/// SQLite runs under the database write lock, so two concurrent callers can
/// never receive the same row.
pub async fn claim_next(pool: &SqlitePool) -> Result<Option<ClaimedJob>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        UPDATE verification_queue
        SET status = 'processing',
            attempts = attempts + 1,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        WHERE id = (
            SELECT id FROM verification_queue
            WHERE status = 'pending'
            ORDER BY created_at ASC, id ASC
            LIMIT 1
        )
          AND status = 'pending'
        RETURNING id, email, provider, attempts
        "#,
    )
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        Ok(ClaimedJob {
            id: r.try_get("id")?,
            email: r.try_get("email")?,
            provider: r.try_get("provider")?,
            attempts: r.try_get("attempts")?,
        })
    })
    .transpose()
}

/// Record a worker's verdict and complete the job.
///
/// Terminal fields are overwritten on repeated submissions (last write wins)
/// while `completed_at` keeps its first value. Non-error results append one
/// history row per job. Returns `false` when the job does not exist.
pub async fn submit_result(
    pool: &SqlitePool,
    submission: &ResultSubmission,
) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        UPDATE verification_queue
        SET status = 'completed',
            result = $1,
            error_message = $2,
            details = $3,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
            completed_at = COALESCE(completed_at, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        WHERE id = $4
        RETURNING email, provider
        "#,
    )
    .bind(submission.result.as_str())
    .bind(submission.error_message.as_deref())
    .bind(submission.details.as_deref())
    .bind(submission.id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        return Ok(false);
    };

    if submission.result != VerificationOutcome::Error {
        let email: String = row.try_get("email")?;
        let provider: String = row.try_get("provider")?;

        sqlx::query(
            r#"
            INSERT INTO verification_results (job_id, email, provider, result, details)
            SELECT $1, $2, $3, $4, $5
            WHERE NOT EXISTS (SELECT 1 FROM verification_results WHERE job_id = $1)
            "#,
        )
        .bind(submission.id)
        .bind(email)
        .bind(provider)
        .bind(submission.result.as_str())
        .bind(submission.details.as_deref())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Counts by status and result, computed from the current rows.
pub async fn stats(pool: &SqlitePool) -> Result<QueueStats, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
            COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing,
            COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
            COALESCE(SUM(CASE WHEN result = 'valid' THEN 1 ELSE 0 END), 0) AS valid,
            COALESCE(SUM(CASE WHEN result = 'invalid' THEN 1 ELSE 0 END), 0) AS invalid,
            COALESCE(SUM(CASE WHEN result = 'strong_bounce' THEN 1 ELSE 0 END), 0) AS strong_bounce,
            COALESCE(SUM(CASE WHEN result = 'error' THEN 1 ELSE 0 END), 0) AS errors
        FROM verification_queue
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(QueueStats {
        total: row.try_get("total")?,
        pending: row.try_get("pending")?,
        processing: row.try_get("processing")?,
        completed: row.try_get("completed")?,
        failed: row.try_get("failed")?,
        valid: row.try_get("valid")?,
        invalid: row.try_get("invalid")?,
        strong_bounce: row.try_get("strong_bounce")?,
        errors: row.try_get("errors")?,
    })
}

/// Job counts for worker-side monitoring.
pub async fn worker_stats(pool: &SqlitePool) -> Result<WorkerStats, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total_jobs,
            COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending_jobs,
            COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing_jobs
        FROM verification_queue
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(WorkerStats {
        total_jobs: row.try_get("total_jobs")?,
        pending_jobs: row.try_get("pending_jobs")?,
        processing_jobs: row.try_get("processing_jobs")?,
    })
}

/// Get a job by ID
pub async fn get_job(pool: &SqlitePool, job_id: i64) -> Result<Option<VerificationJob>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, email, provider, status, result, error_message, details,
               attempts, created_at, updated_at, completed_at
        FROM verification_queue
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Page through the whole queue, newest first.
pub async fn list_jobs(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<Vec<VerificationJob>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, email, provider, status, result, error_message, details,
               attempts, created_at, updated_at, completed_at
        FROM verification_queue
        ORDER BY id DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

pub async fn count_jobs(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM verification_queue")
        .fetch_one(pool)
        .await
}

/// Most recent jobs without offset handling or a total count, for
/// dashboards that poll frequently.
pub async fn recent_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<VerificationJob>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT id, email, provider, status, result, error_message, details,
               attempts, created_at, updated_at, completed_at
        FROM verification_queue
        ORDER BY id DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Emails of completed jobs with the given result, most recently completed first.
pub async fn export_emails(
    pool: &SqlitePool,
    result: VerificationOutcome,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT email
        FROM verification_queue
        WHERE result = $1
        ORDER BY completed_at DESC, id DESC
        "#,
    )
    .bind(result.as_str())
    .fetch_all(pool)
    .await
}

/// Delete every job and history row. Tokens are kept.
pub async fn clear_all(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM verification_queue")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM verification_results")
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

/// Number of history rows, optionally restricted to one job.
pub async fn count_result_records(
    pool: &SqlitePool,
    job_id: Option<i64>,
) -> Result<i64, sqlx::Error> {
    match job_id {
        Some(id) => {
            sqlx::query_scalar("SELECT COUNT(*) FROM verification_results WHERE job_id = $1")
                .bind(id)
                .fetch_one(pool)
                .await
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(*) FROM verification_results")
                .fetch_one(pool)
                .await
        }
    }
}

fn job_from_row(row: &SqliteRow) -> Result<VerificationJob, sqlx::Error> {
    let provider: String = row.try_get("provider")?;
    let status: String = row.try_get("status")?;
    let result: Option<String> = row.try_get("result")?;

    Ok(VerificationJob {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        provider: parse_column("provider", &provider)?,
        status: parse_column("status", &status)?,
        result: result
            .as_deref()
            .map(|r| parse_column("result", r))
            .transpose()?,
        error_message: row.try_get("error_message")?,
        details: row.try_get("details")?,
        attempts: row.try_get("attempts")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn parse_column<T>(column: &str, value: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = strum::ParseError>,
{
    value.parse().map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}
