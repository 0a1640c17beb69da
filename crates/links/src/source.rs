use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CUSTOM_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([^\]]+)\]\s+(\S.*)$").expect("static regex"));

/// A raw request string split into its optional `[name.ext]` prefix and URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub custom_filename: Option<String>,
    pub url: String,
}

/// Split `[name.ext] <url>` into its parts.
///
/// The bracket must open the string and be followed by whitespace and then
/// the URL. Anything else, including an empty name, is a bare URL.
pub fn split_custom_filename(raw: &str) -> SourceRequest {
    let text = raw.trim();
    if let Some(caps) = CUSTOM_NAME.captures(text) {
        let name = caps[1].trim();
        if !name.is_empty() {
            return SourceRequest {
                custom_filename: Some(name.to_string()),
                url: caps[2].trim().to_string(),
            };
        }
    }
    SourceRequest { custom_filename: None, url: text.to_string() }
}
