use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use mediacache::MediaKind;
use tracing::{info, warn};

use crate::error::{ArchiveError, DeliveryError};
use crate::probe::{probe_video, VideoMeta};
use crate::text;

/// A local file on its way to a chat.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub kind: MediaKind,
    pub caption: String,
    pub video: Option<VideoMeta>,
}

/// Chat platform seam. Message ids are returned so status messages can be
/// edited and archived files re-served.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<i64, DeliveryError>;
    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), DeliveryError>;
    async fn send_file(&self, chat_id: i64, file: &OutgoingFile, reply_to: Option<i64>) -> Result<i64, DeliveryError>;
    /// Re-send an existing message without re-uploading its payload.
    async fn copy_message(
        &self,
        chat_id: i64,
        from_chat_id: i64,
        message_id: i64,
        reply_to: Option<i64>,
    ) -> Result<i64, DeliveryError>;
}

/// `"<channel>:<message>"`, the opaque form stored in the cache.
pub fn format_reference(channel: i64, message_id: i64) -> String {
    format!("{channel}:{message_id}")
}

pub fn parse_reference(reference: &str) -> Option<(i64, i64)> {
    let (chan, msg) = reference.split_once(':')?;
    Some((chan.trim().parse().ok()?, msg.trim().parse().ok()?))
}

/// Archive/delivery adapter over a backup channel on the chat platform.
#[derive(Clone)]
pub struct Archive {
    chat: Arc<dyn ChatClient>,
    backup_channel: Option<i64>,
    ffprobe: PathBuf,
}

impl Archive {
    pub fn new(chat: Arc<dyn ChatClient>, backup_channel: Option<i64>, ffprobe: PathBuf) -> Self {
        Self { chat, backup_channel, ffprobe }
    }

    pub fn chat(&self) -> &Arc<dyn ChatClient> {
        &self.chat
    }

    /// Upload to the backup channel. `None` on any failure; callers skip
    /// cache population and deliver fresh.
    pub async fn archive(&self, local_path: &Path, media_kind: MediaKind) -> Option<String> {
        match self.try_archive(local_path, media_kind).await {
            Ok(reference) => {
                info!(reference=%reference, "archive: stored");
                Some(reference)
            }
            Err(ArchiveError::Disabled) => None,
            Err(e) => {
                warn!(path=%local_path.display(), "archive: {e}");
                None
            }
        }
    }

    async fn try_archive(&self, local_path: &Path, media_kind: MediaKind) -> Result<String, ArchiveError> {
        let channel = self.backup_channel.ok_or(ArchiveError::Disabled)?;
        let file = self.outgoing(local_path, media_kind).await.map_err(DeliveryError::from)?;
        let message_id = self.chat.send_file(channel, &file, None).await?;
        Ok(format_reference(channel, message_id))
    }

    /// Re-serve an archived artifact. False, never an error, so the caller
    /// can fall back to a fresh download.
    pub async fn deliver_from_archive(&self, destination_id: i64, reference: &str, reply_target: Option<i64>) -> bool {
        let Some((channel, message_id)) = parse_reference(reference) else {
            warn!(reference=%reference, "archive: malformed reference");
            return false;
        };
        match self.chat.copy_message(destination_id, channel, message_id, reply_target).await {
            Ok(_) => true,
            Err(e) => {
                warn!(reference=%reference, destination_id, "archive: re-serve failed: {e}");
                false
            }
        }
    }

    pub async fn deliver_fresh(
        &self,
        destination_id: i64,
        local_path: &Path,
        reply_target: Option<i64>,
        as_media_kind: MediaKind,
    ) -> Result<(), DeliveryError> {
        let file = self.outgoing(local_path, as_media_kind).await?;
        self.chat.send_file(destination_id, &file, reply_target).await?;
        Ok(())
    }

    async fn outgoing(&self, path: &Path, kind: MediaKind) -> Result<OutgoingFile, std::io::Error> {
        let size_bytes = tokio::fs::metadata(path).await?.len();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let video = match kind {
            MediaKind::Video => Some(probe_video(&self.ffprobe, path).await),
            _ => None,
        };
        Ok(OutgoingFile {
            path: path.to_path_buf(),
            caption: text::caption(&filename, size_bytes),
            filename,
            size_bytes,
            kind,
            video,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_round_trip() {
        let r = format_reference(-1001234, 42);
        assert_eq!(r, "-1001234:42");
        assert_eq!(parse_reference(&r), Some((-1001234, 42)));
        assert_eq!(parse_reference("42"), None);
        assert_eq!(parse_reference("a:b"), None);
    }
}
