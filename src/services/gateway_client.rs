use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::WorkerConfig;
use crate::models::job::{ClaimedJob, WorkerStats};
use crate::models::verification::{
    MessageResponse, NextJobResponse, ResultSubmission, WorkerStatsResponse,
};
use crate::services::auth::WORKER_TOKEN_HEADER;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The worker-facing side of the queue gateway.
#[async_trait]
pub trait JobGateway: Send + Sync {
    /// Claim the next pending job; `None` when the queue is empty.
    async fn next_job(&self) -> Result<Option<ClaimedJob>, GatewayError>;

    async fn submit_result(&self, submission: &ResultSubmission) -> Result<(), GatewayError>;

    async fn worker_stats(&self) -> Result<WorkerStats, GatewayError>;
}

/// HTTP client for the gateway's `/worker` routes.
pub struct GatewayClient {
    http: Client,
    base_url: String,
    token: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self, GatewayError> {
        Self::new(config.api_endpoint.clone(), config.api_token.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl JobGateway for GatewayClient {
    async fn next_job(&self) -> Result<Option<ClaimedJob>, GatewayError> {
        let response = self
            .http
            .get(self.url("/worker/next"))
            .header(WORKER_TOKEN_HEADER, &self.token)
            .send()
            .await?;

        let body: NextJobResponse = decode(response).await?;
        Ok(body.job)
    }

    async fn submit_result(&self, submission: &ResultSubmission) -> Result<(), GatewayError> {
        let response = self
            .http
            .post(self.url("/worker/result"))
            .header(WORKER_TOKEN_HEADER, &self.token)
            .json(submission)
            .send()
            .await?;

        let _: MessageResponse = decode(response).await?;
        Ok(())
    }

    async fn worker_stats(&self) -> Result<WorkerStats, GatewayError> {
        let response = self
            .http
            .get(self.url("/worker/stats"))
            .header(WORKER_TOKEN_HEADER, &self.token)
            .send()
            .await?;

        let body: WorkerStatsResponse = decode(response).await?;
        Ok(body.stats)
    }
}

/// Decode a success body, or turn an error status into [`GatewayError::Rejected`]
/// carrying the gateway's `error` message.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(text);

    Err(GatewayError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl GatewayError {
    /// Transport failures and 5xx responses may succeed on a later attempt;
    /// other rejections will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Http(_) => true,
            GatewayError::Rejected { status, .. } => *status >= 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = GatewayClient::new("http://gateway:3000/", "t").unwrap();
        assert_eq!(client.url("/worker/next"), "http://gateway:3000/worker/next");
    }

    #[test]
    fn test_retryable_classification() {
        let server = GatewayError::Rejected {
            status: 503,
            message: "busy".to_string(),
        };
        let missing = GatewayError::Rejected {
            status: 404,
            message: "Job 9 not found".to_string(),
        };
        assert!(server.is_retryable());
        assert!(!missing.is_retryable());
        assert_eq!(
            missing.to_string(),
            "Gateway rejected request (404): Job 9 not found"
        );
    }
}
