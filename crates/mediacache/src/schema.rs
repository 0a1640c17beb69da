use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "webm"];
const AUDIO_EXTENSIONS: &[&str] = &["m4a", "mp3", "opus", "ogg", "flac", "wav", "aac"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }

    /// Guess from a file name's extension; anything unknown is a document.
    pub fn from_filename(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Audio
        } else {
            MediaKind::Document
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            "document" => Ok(MediaKind::Document),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub source_url: String,
    /// Opaque handle understood by the archive adapter.
    pub archive_reference: String,
    pub media_kind: MediaKind,
    pub filename: String,
    pub size_bytes: u64,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub count: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub requester_id: i64,
    pub source_url: String,
    pub filename: String,
    pub size_bytes: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHistoryRecord {
    pub requester_id: i64,
    pub source_url: String,
    pub filename: String,
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_filename() {
        assert_eq!(MediaKind::from_filename("a.MP4"), MediaKind::Video);
        assert_eq!(MediaKind::from_filename("song.m4a"), MediaKind::Audio);
        assert_eq!(MediaKind::from_filename("archive.zip"), MediaKind::Document);
        assert_eq!(MediaKind::from_filename("noext"), MediaKind::Document);
    }

    #[test]
    fn kind_round_trips_through_text() {
        for k in [MediaKind::Video, MediaKind::Audio, MediaKind::Document] {
            assert_eq!(k.as_str().parse::<MediaKind>().unwrap(), k);
        }
    }
}
