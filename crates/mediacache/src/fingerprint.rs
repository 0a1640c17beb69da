/// Cache key for a normalized URL: hex BLAKE3 of its bytes.
pub fn fingerprint(normalized_url: &str) -> String {
    hex::encode(blake3::hash(normalized_url.as_bytes()).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_and_distinct() {
        let a = fingerprint("https://example.com/a");
        assert_eq!(a, fingerprint("https://example.com/a"));
        assert_ne!(a, fingerprint("https://example.com/b"));
        assert_eq!(a.len(), 64);
    }
}
