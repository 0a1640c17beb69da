use std::path::PathBuf;
use std::time::Duration;

use bytes::BytesMut;
use reqwest::header::USER_AGENT;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::debug;

use super::{sanitize_filename, DownloadRequest, ProgressSink};
use crate::cancel::CancelHandle;
use crate::config::PipelineConfig;
use crate::error::DownloadError;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Stream `req.url` to disk in `chunk_size` writes.
///
/// Only the connect phase has a timeout; a body may take as long as it takes.
pub async fn fetch(
    http: &reqwest::Client,
    req: &DownloadRequest,
    cfg: &PipelineConfig,
    mut progress: ProgressSink,
    cancel: &CancelHandle,
) -> Result<PathBuf, DownloadError> {
    let mut resp = http
        .get(&req.url)
        .header(USER_AGENT, &cfg.user_agent)
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(DownloadError::Status(resp.status().as_u16()));
    }

    let total = resp
        .content_length()
        .or_else(|| req.declared.as_ref().and_then(|d| d.size))
        .filter(|n| *n > 0);
    if let Some(total) = total {
        if total > cfg.max_file_size {
            return Err(DownloadError::TooLarge { limit: cfg.max_file_size });
        }
    }

    let filename = pick_filename(req, resp.url());
    let path = req.workdir.join(&filename);
    let mut file = File::create(&path).await?;
    debug!(job_id=%cancel.job_id(), path=%path.display(), ?total, "direct: streaming");

    let chunk_size = cfg.chunk_size.max(1);
    let mut buf = BytesMut::with_capacity(chunk_size);
    let mut written: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            next = resp.chunk() => next?,
        };
        let Some(chunk) = next else { break };
        buf.extend_from_slice(&chunk);

        if written + buf.len() as u64 > cfg.max_file_size {
            return Err(DownloadError::TooLarge { limit: cfg.max_file_size });
        }
        if buf.len() >= chunk_size {
            file.write_all(&buf).await?;
            written += buf.len() as u64;
            buf.clear();
            if let Some(total) = total {
                progress.report(written as f32 * 100.0 / total as f32);
            }
        }
    }

    if !buf.is_empty() {
        file.write_all(&buf).await?;
        written += buf.len() as u64;
    }
    file.flush().await?;
    if total.is_some() {
        progress.report(100.0);
    }
    debug!(job_id=%cancel.job_id(), written, "direct: finished");
    Ok(path)
}

/// Custom name, then the intake-declared name, then the last path segment.
fn pick_filename(req: &DownloadRequest, final_url: &reqwest::Url) -> String {
    let from_url = final_url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let name = req
        .custom_filename
        .clone()
        .or_else(|| req.declared.as_ref().and_then(|d| d.filename.clone()))
        .or(from_url)
        .unwrap_or_else(|| "downloaded_file".to_string());
    sanitize_filename(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types_jobs::DeclaredFile;
    use links::SourceKind;

    fn req(custom: Option<&str>, declared: Option<&str>) -> DownloadRequest {
        DownloadRequest {
            url: "https://example.com/files/video.mp4".into(),
            kind: SourceKind::Direct,
            host: Some("example.com".into()),
            workdir: PathBuf::from("/tmp"),
            custom_filename: custom.map(str::to_string),
            declared: declared.map(|n| DeclaredFile { filename: Some(n.into()), size: None }),
        }
    }

    #[test]
    fn filename_precedence() {
        let url = reqwest::Url::parse("https://example.com/files/video.mp4").unwrap();
        assert_eq!(pick_filename(&req(Some("mine.mp4"), Some("d.mp4")), &url), "mine.mp4");
        assert_eq!(pick_filename(&req(None, Some("d.mp4")), &url), "d.mp4");
        assert_eq!(pick_filename(&req(None, None), &url), "video.mp4");

        let bare = reqwest::Url::parse("https://example.com/").unwrap();
        assert_eq!(pick_filename(&req(None, None), &bare), "downloaded_file");
    }
}
