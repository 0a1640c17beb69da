use serde::{Deserialize, Serialize};

/// Coarse source category used to pick a download strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    VideoPlatform,
    AudioPlatform,
    Direct,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::VideoPlatform => "video_platform",
            SourceKind::AudioPlatform => "audio_platform",
            SourceKind::Direct => "direct",
        }
    }

    /// Whether the source needs the external extraction tool.
    pub fn needs_extractor(&self) -> bool {
        !matches!(self, SourceKind::Direct)
    }
}

/// A host pattern.
///
/// `example.com` matches the domain and any of its subdomains.
/// `example.*` matches any host carrying an `example` label followed by at
/// least one more label, whatever the TLD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRule {
    Suffix(String),
    AnyTld(String),
}

impl HostRule {
    pub fn parse(pattern: &str) -> Option<Self> {
        let p = pattern.trim().trim_matches('.').to_ascii_lowercase();
        if p.is_empty() {
            return None;
        }
        match p.strip_suffix(".*") {
            Some(label) if !label.is_empty() && !label.contains('.') => {
                Some(HostRule::AnyTld(label.to_string()))
            }
            Some(_) => None,
            None => Some(HostRule::Suffix(p)),
        }
    }

    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        match self {
            HostRule::Suffix(domain) => {
                host == *domain
                    || (host.len() > domain.len()
                        && host.ends_with(domain.as_str())
                        && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
            }
            HostRule::AnyTld(label) => {
                let labels: Vec<&str> = host.split('.').collect();
                labels.len() >= 2 && labels[..labels.len() - 1].iter().any(|l| l == label)
            }
        }
    }
}

/// Parse a comma separated list of host patterns, skipping blanks and junk.
pub fn parse_rules(csv: &str) -> Vec<HostRule> {
    csv.split(',').filter_map(HostRule::parse).collect()
}

/// Per-domain normalization and classification policy.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    /// Hosts whose query string is part of the resource identity.
    pub query_preserving: Vec<HostRule>,
    pub video_platforms: Vec<HostRule>,
    pub audio_platforms: Vec<HostRule>,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            query_preserving: parse_rules("pornhub.*,xvideos.*,xnxx.*"),
            video_platforms: parse_rules("youtube.com,youtu.be,pornhub.*,xvideos.*,xnxx.*"),
            audio_platforms: parse_rules("soundcloud.com,deezer.com"),
        }
    }
}

impl LinkPolicy {
    pub fn with_query_preserving(mut self, rules: Vec<HostRule>) -> Self {
        self.query_preserving = rules;
        self
    }

    pub fn preserves_query(&self, host: &str) -> bool {
        self.query_preserving.iter().any(|r| r.matches(host))
    }

    pub fn kind_for_host(&self, host: &str) -> SourceKind {
        if self.video_platforms.iter().any(|r| r.matches(host)) {
            SourceKind::VideoPlatform
        } else if self.audio_platforms.iter().any(|r| r.matches(host)) {
            SourceKind::AudioPlatform
        } else {
            SourceKind::Direct
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_rule_matches_subdomains_only_on_label_boundary() {
        let rule = HostRule::parse("youtube.com").unwrap();
        assert!(rule.matches("youtube.com"));
        assert!(rule.matches("www.youtube.com"));
        assert!(rule.matches("M.YouTube.com"));
        assert!(!rule.matches("notyoutube.com"));
        assert!(!rule.matches("youtube.com.evil.net"));
    }

    #[test]
    fn any_tld_rule() {
        let rule = HostRule::parse("pornhub.*").unwrap();
        assert!(rule.matches("www.pornhub.com"));
        assert!(rule.matches("pornhub.org"));
        assert!(!rule.matches("pornhub"));
        assert!(!rule.matches("mypornhub.com"));
    }

    #[test]
    fn parse_rules_skips_junk() {
        let rules = parse_rules(" a.com, ,b.*, .*, c.d.*");
        assert_eq!(
            rules,
            vec![HostRule::Suffix("a.com".into()), HostRule::AnyTld("b".into())]
        );
    }

    #[test]
    fn default_policy_kinds() {
        let p = LinkPolicy::default();
        assert_eq!(p.kind_for_host("youtu.be"), SourceKind::VideoPlatform);
        assert_eq!(p.kind_for_host("soundcloud.com"), SourceKind::AudioPlatform);
        assert_eq!(p.kind_for_host("example.com"), SourceKind::Direct);
    }
}
