use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Status of a verification job in the queue.
///
/// Transitions only move forward: `pending → processing → completed`.
/// `Failed` is reserved for retry exhaustion and is not produced by the
/// current worker.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Mailbox provider whose login flow is probed.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    Display,
    IntoStaticStr,
)]
pub enum Provider {
    #[default]
    #[serde(rename = "office365")]
    #[strum(serialize = "office365")]
    Office365,

    #[serde(rename = "gmail")]
    #[strum(serialize = "gmail")]
    Gmail,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Terminal result recorded for a completed job.
///
/// `Invalid` is a legacy outcome: the gateway still accepts and counts it,
/// but the classifiers never produce it.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerificationOutcome {
    Valid,
    Invalid,
    StrongBounce,
    Error,
}

impl VerificationOutcome {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// A row of the verification queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationJob {
    pub id: i64,
    pub email: String,
    pub provider: Provider,
    pub status: JobStatus,
    pub result: Option<VerificationOutcome>,
    pub error_message: Option<String>,
    pub details: Option<String>,
    pub attempts: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The slice of a job handed to a worker when it claims it.
///
/// `provider` stays a plain string on the wire so a worker that does not
/// know a provider can still report an error result for the job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimedJob {
    pub id: i64,
    pub email: String,
    pub provider: String,
    #[serde(default)]
    pub attempts: i64,
}

impl ClaimedJob {
    pub fn provider(&self) -> Result<Provider, strum::ParseError> {
        self.provider.parse()
    }
}

/// Aggregate counts computed on read from the current queue rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub valid: i64,
    pub invalid: i64,
    pub strong_bounce: i64,
    pub errors: i64,
}

/// Operational counts exposed to authenticated workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerStats {
    pub total_jobs: i64,
    pub pending_jobs: i64,
    pub processing_jobs: i64,
}
