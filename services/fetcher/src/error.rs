use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use uuid::Uuid;

use crate::types_jobs::JobState;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("cancelled")]
    Cancelled,
    #[error("origin request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("origin returned HTTP {0}")]
    Status(u16),
    /// `anonymous` when the tool ran without a cookies file.
    #[error("extractor exited with {status}: {detail}")]
    Extractor { status: String, detail: String, anonymous: bool },
    #[error("extractor finished without producing a media file")]
    NoArtifact { anonymous: bool },
    #[error("failed to start extractor: {0}")]
    Spawn(std::io::Error),
    #[error("file exceeds the {limit} byte ceiling")]
    TooLarge { limit: u64 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Origin refused access, most often for lack of cookies.
    pub fn is_access_denied(&self) -> bool {
        match self {
            DownloadError::Status(code) => matches!(code, 401 | 403),
            DownloadError::Request(e) => e
                .status()
                .map(|s| s == reqwest::StatusCode::FORBIDDEN || s == reqwest::StatusCode::UNAUTHORIZED)
                .unwrap_or(false),
            DownloadError::Extractor { anonymous: true, .. } | DownloadError::NoArtifact { anonymous: true } => true,
            DownloadError::Extractor { detail, .. } => {
                let d = detail.to_ascii_lowercase();
                d.contains("403") || d.contains("forbidden") || d.contains("cookies")
            }
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("chat api request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat api rejected the call: {0}")]
    Api(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no backup channel configured")]
    Disabled,
    #[error("upload to backup channel failed: {0}")]
    Upload(#[from] DeliveryError),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Download(DownloadError),
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("workspace: {0}")]
    Workspace(std::io::Error),
}

impl From<DownloadError> for JobError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::Cancelled => JobError::Cancelled,
            other => JobError::Download(other),
        }
    }
}

impl JobError {
    pub fn terminal_state(&self) -> JobState {
        match self {
            JobError::Cancelled => JobState::Cancelled,
            _ => JobState::Failed,
        }
    }
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("requester already has an active job")]
    AlreadyActive { active_job_id: Uuid },
    #[error("job {0} is already registered")]
    DuplicateJob(Uuid),
    #[error("job queue is full")]
    QueueFull,
    #[error("job queue is closed")]
    QueueClosed,
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        match self {
            IntakeError::AlreadyActive { active_job_id } => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": "already_active",
                    "active_job_id": active_job_id,
                })),
            )
                .into_response(),
            IntakeError::Invalid(msg) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": msg })),
            )
                .into_response(),
            other => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": other.to_string() })),
            )
                .into_response(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid bearer token")]
    Invalid,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Missing => StatusCode::UNAUTHORIZED,
            AuthError::Invalid => StatusCode::FORBIDDEN,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
