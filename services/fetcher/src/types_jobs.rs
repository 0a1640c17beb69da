use serde::{Deserialize, Serialize};
use uuid::Uuid;

use links::split_custom_filename;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Downloading,
    Uploading,
    Delivering,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Downloading => "downloading",
            JobState::Uploading => "uploading",
            JobState::Delivering => "delivering",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }

    /// Legal edges of the per-job state machine.
    pub fn can_transition(&self, to: JobState) -> bool {
        use JobState::*;
        match (self, to) {
            (Queued, Downloading | Delivering | Cancelled | Failed) => true,
            (Downloading, Uploading | Cancelled | Failed) => true,
            (Uploading, Delivering | Cancelled | Failed) => true,
            // Archive re-serve failed after a cache hit: fetch fresh.
            (Delivering, Downloading | Completed | Cancelled | Failed) => true,
            _ => false,
        }
    }
}

/// Filename and size an intake tier already knows for a direct source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeclaredFile {
    pub filename: Option<String>,
    pub size: Option<u64>,
}

/// A fetch request as handed to the orchestrator. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub requester_id: i64,
    pub destination_id: i64,
    pub reply_target: Option<i64>,
    pub raw_source: String,
    pub custom_filename: Option<String>,
    pub declared: Option<DeclaredFile>,
}

impl Job {
    /// Build a job, pulling a `[name.ext]` prefix out of `raw_source`.
    pub fn new(requester_id: i64, destination_id: i64, raw_source: impl Into<String>) -> Self {
        let raw_source = raw_source.into();
        let custom_filename = split_custom_filename(&raw_source).custom_filename;
        Self {
            job_id: Uuid::new_v4(),
            requester_id,
            destination_id,
            reply_target: None,
            raw_source,
            custom_filename,
            declared: None,
        }
    }

    pub fn reply_to(mut self, message_id: Option<i64>) -> Self {
        self.reply_target = message_id;
        self
    }

    pub fn with_declared(mut self, declared: Option<DeclaredFile>) -> Self {
        self.declared = declared;
        self
    }

    /// Explicit filename, honoured only when the raw string had no prefix.
    pub fn with_fallback_filename(mut self, name: Option<String>) -> Self {
        if self.custom_filename.is_none() {
            self.custom_filename = name.filter(|n| !n.trim().is_empty());
        }
        self
    }
}

/// Live view of a non-terminal job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub requester_id: i64,
    pub state: JobState,
    pub progress: Option<f32>,
    pub from_cache: bool,
    pub source: String,
    pub updated_at: u64,
}

impl JobStatus {
    pub fn queued(job: &Job, now_ts: u64) -> Self {
        Self {
            job_id: job.job_id,
            requester_id: job.requester_id,
            state: JobState::Queued,
            progress: None,
            from_cache: false,
            source: job.raw_source.clone(),
            updated_at: now_ts,
        }
    }
}

/// Published on every state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub requester_id: i64,
    pub state: JobState,
}

pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
