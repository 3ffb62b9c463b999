use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::job::VerificationOutcome;

/// Downloadable address lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Valid,
    /// Strong bounces.
    Invalid,
}

impl ExportKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "valid" => Some(ExportKind::Valid),
            "invalid" => Some(ExportKind::Invalid),
            _ => None,
        }
    }

    pub fn outcome(self) -> VerificationOutcome {
        match self {
            ExportKind::Valid => VerificationOutcome::Valid,
            ExportKind::Invalid => VerificationOutcome::StrongBounce,
        }
    }

    fn content_disposition(self) -> &'static str {
        match self {
            ExportKind::Valid => "attachment; filename=\"valid-emails.txt\"",
            ExportKind::Invalid => "attachment; filename=\"invalid-emails.txt\"",
        }
    }
}

/// GET /export/{valid|invalid} — one address per line, most recently
/// completed first.
pub async fn export_emails(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = ExportKind::parse(&kind)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown export '{}'", kind)))?;

    let emails = state
        .queue
        .export(kind.outcome())
        .await
        .map_err(|e| ApiError::internal("Failed to export emails", e))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CONTENT_DISPOSITION, kind.content_disposition()),
        ],
        emails.join("\n"),
    ))
}
