use serde::{Deserialize, Serialize};
use url::Url;

use crate::policy::{LinkPolicy, SourceKind};
use crate::source::split_custom_filename;

const YOUTUBE_CANONICAL: &str = "https://www.youtube.com/watch?v=";

/// Outcome of running a raw request string through the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSource {
    pub url: String,
    pub kind: SourceKind,
    pub custom_filename: Option<String>,
    pub host: Option<String>,
}

/// Parse, normalize and classify a raw request string.
pub fn resolve(raw: &str, policy: &LinkPolicy) -> ResolvedSource {
    let req = split_custom_filename(raw);
    let url = normalize(&req.url, policy);
    ResolvedSource {
        kind: classify(&url, policy),
        host: host_of(&url),
        custom_filename: req.custom_filename,
        url,
    }
}

/// Lower-cased host of `url`, if it parses as an absolute URL with a host.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Canonicalize a URL for identity purposes.
///
/// Short and "shorts" video links become the canonical watch form, hosts on
/// the query-preserving list keep the input verbatim, everything else loses
/// its query string and fragment. Applying this twice is a no-op.
pub fn normalize(url: &str, policy: &LinkPolicy) -> String {
    let trimmed = url.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return strip_query(trimmed).to_string();
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();

    if let Some(id) = youtube_video_id(&parsed, &host) {
        return format!("{YOUTUBE_CANONICAL}{id}");
    }
    if policy.preserves_query(&host) {
        return trimmed.to_string();
    }
    strip_query(trimmed).to_string()
}

/// Classify an already-normalized URL. Unknown or unparsable input is direct.
pub fn classify(url: &str, policy: &LinkPolicy) -> SourceKind {
    match host_of(url) {
        Some(host) => policy.kind_for_host(&host),
        None => SourceKind::Direct,
    }
}

fn strip_query(url: &str) -> &str {
    let end = url.find(|c| c == '?' || c == '#').unwrap_or(url.len());
    &url[..end]
}

fn youtube_video_id(url: &Url, host: &str) -> Option<String> {
    let host = host.strip_prefix("www.").unwrap_or(host);
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    let id = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "m.youtube.com" | "music.youtube.com" => match segments.next() {
            Some("shorts") | Some("live") | Some("embed") => segments.next().map(str::to_string),
            Some("watch") => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            _ => None,
        },
        _ => None,
    }?;

    let valid = !id.is_empty()
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p() -> LinkPolicy {
        LinkPolicy::default()
    }

    #[test]
    fn short_links_become_watch_urls() {
        assert_eq!(
            normalize("https://youtu.be/dQw4w9WgXcQ?si=abc", &p()),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(
            normalize("https://www.youtube.com/shorts/abc_DEF-1?feature=share", &p()),
            "https://www.youtube.com/watch?v=abc_DEF-1"
        );
    }

    #[test]
    fn watch_urls_keep_only_video_id() {
        assert_eq!(
            normalize("https://m.youtube.com/watch?list=PL1&v=xyz&t=10", &p()),
            "https://www.youtube.com/watch?v=xyz"
        );
    }

    #[test]
    fn query_is_stripped_for_ordinary_hosts() {
        assert_eq!(
            normalize("https://cdn.example.com/file.mp4?token=1#frag", &p()),
            "https://cdn.example.com/file.mp4"
        );
        assert_eq!(
            normalize("https://soundcloud.com/a/b?in=x", &p()),
            "https://soundcloud.com/a/b"
        );
    }

    #[test]
    fn query_is_kept_for_allow_listed_hosts() {
        let url = "https://www.pornhub.com/view_video.php?viewkey=ph123";
        assert_eq!(normalize(url, &p()), url);
    }

    #[test]
    fn garbage_is_total() {
        assert_eq!(normalize("  not a url?x=1 ", &p()), "not a url");
        assert_eq!(classify("not a url", &p()), SourceKind::Direct);
    }

    #[test]
    fn resolve_carries_everything() {
        let r = resolve("[song.m4a] https://soundcloud.com/a/b?x=1", &p());
        assert_eq!(r.url, "https://soundcloud.com/a/b");
        assert_eq!(r.kind, SourceKind::AudioPlatform);
        assert_eq!(r.custom_filename.as_deref(), Some("song.m4a"));
        assert_eq!(r.host.as_deref(), Some("soundcloud.com"));
    }
}
