use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;

use links::SourceKind;
use mediacache::MediaKind;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use super::{sanitize_filename, DownloadRequest, ProgressSink};
use crate::cancel::CancelHandle;
use crate::config::PipelineConfig;
use crate::error::DownloadError;

const VIDEO_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";
const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio/best";
const TAIL_LINES: usize = 20;

static PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)%").expect("static regex"));

/// Argument vector for the extraction tool, url last.
pub fn build_args(req: &DownloadRequest, cfg: &PipelineConfig, with_cookies: bool) -> Vec<String> {
    let mut args: Vec<String> = vec!["--no-warnings".into(), "--no-playlist".into(), "--newline".into()];

    match req.kind {
        SourceKind::AudioPlatform => {
            args.extend(["-f".into(), AUDIO_FORMAT.into()]);
        }
        _ => {
            args.extend(["-f".into(), VIDEO_FORMAT.into()]);
            args.extend(["--merge-output-format".into(), "mp4".into()]);
        }
    }

    let template = match &req.custom_filename {
        Some(name) => req.workdir.join(sanitize_filename(name)),
        None => req.workdir.join("%(title)s.%(ext)s"),
    };
    args.extend(["-o".into(), template.to_string_lossy().into_owned()]);
    args.extend(["--user-agent".into(), cfg.user_agent.clone()]);

    // Hosts whose identity lives in the query also check the referer.
    if let Some(host) = &req.host {
        if cfg.links.preserves_query(host) {
            args.extend(["--add-header".into(), format!("Referer:https://{host}/")]);
        }
    }

    if with_cookies {
        args.extend(["--cookies".into(), cfg.cookies_path.to_string_lossy().into_owned()]);
    }

    args.push(req.url.clone());
    args
}

/// Percentage from a `[download]` progress line.
pub fn parse_percent(line: &str) -> Option<f32> {
    if !line.contains("[download]") {
        return None;
    }
    PERCENT.captures(line).and_then(|c| c[1].parse().ok())
}

pub async fn fetch(
    req: &DownloadRequest,
    cfg: &PipelineConfig,
    mut progress: ProgressSink,
    cancel: &CancelHandle,
) -> Result<PathBuf, DownloadError> {
    let with_cookies = tokio::fs::try_exists(&cfg.cookies_path).await.unwrap_or(false);
    if !with_cookies {
        warn!(path=%cfg.cookies_path.display(), "extractor: cookies file not found, going anonymous");
    }

    let started = SystemTime::now();
    let mut cmd = Command::new(&cfg.extractor_bin);
    cmd.args(build_args(req, cfg, with_cookies))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(DownloadError::Spawn)?;
    info!(job_id=%cancel.job_id(), pid=?child.id(), "extractor: spawned");

    // Both streams feed one channel; the loop ends once both close.
    let (tx, mut rx) = mpsc::channel::<String>(256);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let mut tail: VecDeque<String> = VecDeque::with_capacity(TAIL_LINES);
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(DownloadError::Cancelled);
            }
            line = rx.recv() => line,
        };
        let Some(line) = line else { break };

        if let Some(pct) = parse_percent(&line) {
            progress.report(pct);
            continue;
        }
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    let status = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(DownloadError::Cancelled);
        }
        status = child.wait() => status?,
    };
    if !status.success() {
        let detail: String = tail.into_iter().collect::<Vec<_>>().join("\n");
        let detail: String = detail.chars().take(500).collect();
        return Err(DownloadError::Extractor {
            status: status.to_string(),
            detail,
            anonymous: !with_cookies,
        });
    }

    locate_artifact(&req.workdir, started)
        .await?
        .ok_or(DownloadError::NoArtifact { anonymous: !with_cookies })
}

/// Forward output lines until EOF. Bytes that are not UTF-8 are replaced,
/// never fatal: a closed pipe would kill the tool mid-download.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("extractor: output read failed: {e}");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf).trim_end_matches(['\r', '\n']).to_string();
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

/// Newest media file in `dir` written at or after `since`.
///
/// The tool's template naming is not predictable enough to compute the path.
pub async fn locate_artifact(dir: &Path, since: SystemTime) -> std::io::Result<Option<PathBuf>> {
    // Filesystems with coarse mtimes round down.
    let since = since
        .checked_sub(std::time::Duration::from_secs(2))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut best: Option<(SystemTime, PathBuf)> = None;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".part") || MediaKind::from_filename(&name) == MediaKind::Document {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if modified < since {
            continue;
        }
        if best.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            best = Some((modified, path));
        }
    }
    Ok(best.map(|(_, p)| p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use links::LinkPolicy;

    fn req(kind: SourceKind, host: &str, custom: Option<&str>) -> DownloadRequest {
        DownloadRequest {
            url: format!("https://{host}/watch"),
            kind,
            host: Some(host.into()),
            workdir: PathBuf::from("/work"),
            custom_filename: custom.map(str::to_string),
            declared: None,
        }
    }

    #[test]
    fn percent_only_from_download_lines() {
        assert_eq!(parse_percent("[download]  42.5% of 10.00MiB at 1.00MiB/s"), Some(42.5));
        assert_eq!(parse_percent("[download] 100% of 3.2MiB"), Some(100.0));
        assert_eq!(parse_percent("[info] 50% done"), None);
        assert_eq!(parse_percent("[download] Destination: a.mp4"), None);
    }

    #[test]
    fn video_args_merge_to_mp4() {
        let cfg = PipelineConfig::new("/work");
        let args = build_args(&req(SourceKind::VideoPlatform, "www.youtube.com", None), &cfg, false);
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == VIDEO_FORMAT));
        assert!(args.windows(2).any(|w| w[0] == "--merge-output-format" && w[1] == "mp4"));
        assert!(args.windows(2).any(|w| w[0] == "-o" && w[1] == "/work/%(title)s.%(ext)s"));
        assert!(!args.iter().any(|a| a == "--cookies"));
        assert!(!args.iter().any(|a| a == "--add-header"));
        assert_eq!(args.last().map(String::as_str), Some("https://www.youtube.com/watch"));
    }

    #[test]
    fn audio_args_and_custom_name() {
        let cfg = PipelineConfig::new("/work");
        let args = build_args(&req(SourceKind::AudioPlatform, "soundcloud.com", Some("song.m4a")), &cfg, true);
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == AUDIO_FORMAT));
        assert!(!args.iter().any(|a| a == "--merge-output-format"));
        assert!(args.windows(2).any(|w| w[0] == "-o" && w[1] == "/work/song.m4a"));
        assert!(args.windows(2).any(|w| w[0] == "--cookies" && w[1] == "cookies.txt"));
    }

    #[test]
    fn query_identity_hosts_get_referer() {
        let mut cfg = PipelineConfig::new("/work");
        cfg.links = LinkPolicy::default();
        let args = build_args(&req(SourceKind::VideoPlatform, "www.pornhub.com", None), &cfg, false);
        assert!(args
            .windows(2)
            .any(|w| w[0] == "--add-header" && w[1] == "Referer:https://www.pornhub.com/"));
    }

    #[tokio::test]
    async fn output_lines_survive_invalid_utf8() {
        let raw: &[u8] = b"[download] Destination: caf\xe9.mp4\r\n[download]  50.0% of 1.00MiB\nlast";
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines(raw, tx).await;

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "[download] Destination: caf\u{FFFD}.mp4");
        assert_eq!(parse_percent(&lines[1]), Some(50.0));
        assert_eq!(lines[2], "last");
    }

    #[tokio::test]
    async fn locate_picks_newest_media_file() {
        let dir = tempfile::tempdir().unwrap();
        let since = SystemTime::now();
        tokio::fs::write(dir.path().join("notes.txt"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("clip.mp4.part"), b"x").await.unwrap();
        assert_eq!(locate_artifact(dir.path(), since).await.unwrap(), None);

        tokio::fs::write(dir.path().join("clip.mp4"), b"x").await.unwrap();
        let found = locate_artifact(dir.path(), since).await.unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "clip.mp4");
    }
}
