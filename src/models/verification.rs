use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{
    ClaimedJob, Provider, QueueStats, VerificationJob, VerificationOutcome, WorkerStats,
};

/// Largest batch accepted by `POST /queue/verify`.
pub const MAX_BATCH_SIZE: usize = 1000;

/// One entry of an enqueue batch: either a bare address or an object that
/// may pin its own provider. Anything else is kept as `Other` so the rest of
/// the batch can still be queued.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EmailEntry {
    Address(String),
    Detailed {
        email: String,
        #[serde(default)]
        provider: Option<Provider>,
    },
    Other(serde_json::Value),
}

impl EmailEntry {
    pub fn email(&self) -> Option<&str> {
        match self {
            EmailEntry::Address(email) => Some(email),
            EmailEntry::Detailed { email, .. } => Some(email),
            EmailEntry::Other(value) => value.get("email").and_then(|e| e.as_str()),
        }
    }

    pub fn provider(&self) -> Option<Provider> {
        match self {
            EmailEntry::Detailed { provider, .. } => *provider,
            _ => None,
        }
    }

    /// How the entry is echoed back in per-item results.
    pub fn label(&self) -> String {
        match (self, self.email()) {
            (_, Some(email)) => email.to_string(),
            (EmailEntry::Other(value), None) => value.to_string(),
            _ => String::new(),
        }
    }

    /// Why an entry cannot be queued at all, before address checks.
    pub fn rejection(&self) -> Option<String> {
        let EmailEntry::Other(value) = self else {
            return None;
        };

        match (self.email(), value.get("provider").and_then(|p| p.as_str())) {
            (Some(_), Some(provider)) => Some(format!("Unsupported provider '{}'", provider)),
            _ => Some("Invalid email format".to_string()),
        }
    }
}

/// Request to queue a batch of addresses for verification.
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    // Keep in step with MAX_BATCH_SIZE.
    #[garde(length(min = 1, max = 1000))]
    pub emails: Vec<EmailEntry>,

    /// Provider for entries that do not name one (defaults to office365).
    #[garde(skip)]
    #[serde(default)]
    pub provider: Option<Provider>,
}

/// Per-item outcome of an enqueue request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnqueueItemResult {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnqueueItemResult {
    pub fn queued(email: &str, provider: Provider) -> Self {
        Self {
            email: email.to_string(),
            provider: Some(provider),
            status: Some("queued".to_string()),
            error: None,
        }
    }

    pub fn rejected(email: &str, error: &str) -> Self {
        Self {
            email: email.to_string(),
            provider: None,
            status: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_queued(&self) -> bool {
        self.status.is_some()
    }
}

/// Response after queuing a batch.
///
/// `inserted` can be lower than the number of queued items when some pairs
/// were already waiting in the queue.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub success: bool,
    pub message: String,
    pub inserted: u64,
    pub results: Vec<EnqueueItemResult>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub success: bool,
    pub data: Vec<VerificationJob>,
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecentJobsResponse {
    pub success: bool,
    pub data: Vec<VerificationJob>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: QueueStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Response of `GET /worker/next`; `job` is null when nothing is claimable.
#[derive(Debug, Serialize, Deserialize)]
pub struct NextJobResponse {
    pub success: bool,
    pub job: Option<ClaimedJob>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkerStatsResponse {
    pub success: bool,
    pub stats: WorkerStats,
}

/// Body of `POST /worker/result` as received. Fields are optional so that
/// missing values produce a 400 with a readable message instead of a
/// deserializer rejection.
#[derive(Debug, Default, Deserialize)]
pub struct WorkerResultRequest {
    pub id: Option<i64>,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub details: Option<String>,
}

/// A checked result submission, as sent by workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultSubmission {
    pub id: i64,
    pub result: VerificationOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl TryFrom<WorkerResultRequest> for ResultSubmission {
    type Error = String;

    fn try_from(req: WorkerResultRequest) -> Result<Self, Self::Error> {
        let (id, result) = match (req.id, req.result) {
            (Some(id), Some(result)) => (id, result),
            _ => return Err("Job ID and result are required".to_string()),
        };

        let result = result
            .parse::<VerificationOutcome>()
            .map_err(|_| format!("Unknown result '{}'", result))?;

        Ok(Self {
            id,
            result,
            error_message: req.error_message,
            details: req.details,
        })
    }
}
