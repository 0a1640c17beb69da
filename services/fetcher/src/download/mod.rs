//! Download strategies.
//!
//! Two strategies share one contract: fetch `url` into the job's working
//! directory, report progress through a [`ProgressSink`], stop with
//! [`DownloadError::Cancelled`] once the job's cancel flag is raised.

pub mod direct;
pub mod extractor;
pub mod progress;

use std::path::PathBuf;
use std::sync::Arc;

use links::SourceKind;
use mediacache::MediaKind;
use tracing::{info, warn};

use crate::cancel::{ActiveResource, CancelHandle};
use crate::config::PipelineConfig;
use crate::error::DownloadError;
use crate::types_jobs::DeclaredFile;

pub use progress::ProgressSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Extractor,
    Direct,
}

impl Strategy {
    pub fn for_kind(kind: SourceKind) -> Self {
        if kind.needs_extractor() {
            Strategy::Extractor
        } else {
            Strategy::Direct
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Extractor => "extractor",
            Strategy::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub kind: SourceKind,
    pub host: Option<String>,
    pub workdir: PathBuf,
    pub custom_filename: Option<String>,
    pub declared: Option<DeclaredFile>,
}

#[derive(Debug, Clone)]
pub struct Downloaded {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub media_kind: MediaKind,
}

/// Run `strategy` on its own task so a cancel request can abort it through
/// the registry, then describe the artifact it left behind.
pub async fn run(
    strategy: Strategy,
    req: DownloadRequest,
    cfg: Arc<PipelineConfig>,
    http: reqwest::Client,
    progress: ProgressSink,
    cancel: &CancelHandle,
) -> Result<Downloaded, DownloadError> {
    if cancel.is_cancelled() {
        return Err(DownloadError::Cancelled);
    }
    info!(job_id=%cancel.job_id(), strategy=strategy.as_str(), url=%req.url, "download: start");

    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        match strategy {
            Strategy::Extractor => extractor::fetch(&req, &cfg, progress, &task_cancel).await,
            Strategy::Direct => direct::fetch(&http, &req, &cfg, progress, &task_cancel).await,
        }
    });
    let resource = match strategy {
        Strategy::Extractor => ActiveResource::Subprocess(task.abort_handle()),
        Strategy::Direct => ActiveResource::Stream(task.abort_handle()),
    };
    cancel.attach(resource).await;

    let joined = task.await;
    cancel.detach().await;

    let path = match joined {
        Ok(res) => res?,
        Err(e) if e.is_cancelled() => return Err(DownloadError::Cancelled),
        Err(e) => {
            warn!(job_id=%cancel.job_id(), "download: task panicked: {e}");
            return Err(DownloadError::Io(std::io::Error::other(e.to_string())));
        }
    };

    let size_bytes = tokio::fs::metadata(&path).await?.len();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "downloaded_file".to_string());
    info!(job_id=%cancel.job_id(), file=%filename, size_bytes, "download: done");

    Ok(Downloaded {
        media_kind: MediaKind::from_filename(&filename),
        path,
        filename,
        size_bytes,
    })
}

/// Make a name safe to use as a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.').trim();
    let mut out: String = trimmed.chars().take(200).collect();
    if out.is_empty() {
        out = "downloaded_file".to_string();
    }
    out
}
