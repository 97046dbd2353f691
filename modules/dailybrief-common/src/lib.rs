pub mod config;
pub mod error;
pub mod text;
pub mod types;

pub use config::Config;
pub use error::DailybriefError;
pub use types::{Article, FetchResult, SourceType, CATEGORIES, FALLBACK_CATEGORY};

use sha2::{Digest, Sha256};

/// Stable hex digest of arbitrary content, used for change detection.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
