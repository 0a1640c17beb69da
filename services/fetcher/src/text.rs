//! Requester-facing message text.

use crate::error::{DownloadError, JobError};

/// Human-readable size in binary units, one decimal.
pub fn format_bytes(size: u64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}

pub fn processing() -> String {
    "Processing your request...".to_string()
}

pub fn from_cache(filename: &str, size: u64) -> String {
    format!("Found in cache, sending...\n{filename}\n{}", format_bytes(size))
}

pub fn downloading(percent: Option<f32>) -> String {
    match percent {
        Some(p) => format!("Downloading... {p:.1}%"),
        None => "Downloading...".to_string(),
    }
}

pub fn uploading(filename: &str, size: u64) -> String {
    format!("Uploading...\n{filename}\n{}", format_bytes(size))
}

pub fn delivered(filename: &str, size: u64) -> String {
    format!("Done.\n{filename}\n{}", format_bytes(size))
}

pub fn caption(filename: &str, size: u64) -> String {
    format!("{filename}\n{}", format_bytes(size))
}

pub fn cancelled() -> String {
    "Download cancelled.".to_string()
}

/// Final status text for a failed or cancelled job.
pub fn failure(err: &JobError) -> String {
    match err {
        JobError::Cancelled => cancelled(),
        JobError::Download(e) if e.is_access_denied() => {
            "Access denied by the source. This site probably needs a cookies file; \
             ask the operator to provide one and try again."
                .to_string()
        }
        JobError::Download(DownloadError::TooLarge { limit }) => {
            format!("File is too large. Limit is {}.", format_bytes(*limit))
        }
        JobError::Download(DownloadError::NoArtifact { .. }) => {
            "Nothing was downloaded. The link may be private or unsupported.".to_string()
        }
        JobError::Download(e) => format!("Download failed: {}", short(&e.to_string())),
        JobError::Delivery(e) => format!("Could not send the file: {}", short(&e.to_string())),
        JobError::Workspace(_) => "Internal storage error, please try again later.".to_string(),
    }
}

fn short(s: &str) -> String {
    s.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_units() {
        assert_eq!(format_bytes(0), "0.0 B");
        assert_eq!(format_bytes(1023), "1023.0 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(12_897_485), "12.3 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024 * 1024), "5.0 TB");
    }

    #[test]
    fn access_denied_has_its_own_message() {
        let msg = failure(&JobError::Download(DownloadError::Status(403)));
        assert!(msg.contains("cookies"));
        let generic = failure(&JobError::Download(DownloadError::Status(500)));
        assert!(generic.starts_with("Download failed"));
    }

    #[test]
    fn empty_anonymous_run_asks_for_cookies() {
        let msg = failure(&JobError::Download(DownloadError::NoArtifact { anonymous: true }));
        assert!(msg.contains("cookies"));
        let msg = failure(&JobError::Download(DownloadError::NoArtifact { anonymous: false }));
        assert!(msg.starts_with("Nothing was downloaded"));
    }
}
