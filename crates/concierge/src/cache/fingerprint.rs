//! Cache keys for embedded text

use sha2::{Digest, Sha256};

/// Collapse whitespace runs, trim and lowercase
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 hex digest of the normalized text, scoped to `namespace`.
///
/// The namespace is normally the embedding model id so vectors from
/// different models never share a key.
pub fn fingerprint(namespace: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(text).as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  Hello \t  World\n"), "hello world");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_fingerprint_ignores_formatting_differences() {
        let a = fingerprint("model", "Reset my  password");
        let b = fingerprint("model", "reset my password ");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_is_namespaced() {
        assert_ne!(fingerprint("model-a", "text"), fingerprint("model-b", "text"));
        assert_ne!(fingerprint("model", "text a"), fingerprint("model", "text b"));
    }
}
