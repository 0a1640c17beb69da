use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// Stream geometry attached to video uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub duration_secs: u32,
}

impl Default for VideoMeta {
    fn default() -> Self {
        Self { width: 1280, height: 720, duration_secs: 0 }
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Probe the first video stream. Never fails; unknown fields fall back to
/// 1280x720 and a zero duration.
pub async fn probe_video(ffprobe: &Path, file: &Path) -> VideoMeta {
    let out = Command::new(ffprobe)
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,duration", "-of", "json"])
        .arg(file)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match out {
        Ok(o) if o.status.success() => parse_probe(&o.stdout),
        Ok(o) => {
            debug!(status=%o.status, file=%file.display(), "probe: ffprobe failed");
            VideoMeta::default()
        }
        Err(e) => {
            debug!(file=%file.display(), "probe: ffprobe unavailable: {e}");
            VideoMeta::default()
        }
    }
}

pub fn parse_probe(stdout: &[u8]) -> VideoMeta {
    let fallback = VideoMeta::default();
    let Ok(parsed) = serde_json::from_slice::<ProbeOutput>(stdout) else {
        return fallback;
    };
    let Some(s) = parsed.streams.into_iter().next() else {
        return fallback;
    };
    VideoMeta {
        width: s.width.filter(|w| *w > 0).unwrap_or(fallback.width),
        height: s.height.filter(|h| *h > 0).unwrap_or(fallback.height),
        duration_secs: s
            .duration
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| d as u32)
            .unwrap_or(0),
    }
}
