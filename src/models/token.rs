use chrono::{DateTime, Utc};

/// Bearer credential presented by workers in `X-Worker-Token`.
#[derive(Debug, Clone)]
pub struct ApiToken {
    pub id: i64,
    pub token: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}
