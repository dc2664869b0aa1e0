//! Shared key layout for storage backends.

use crate::traits::{StorageError, StorageResult};
use reelcast_core::constants::PROCESSED_PREFIX;

pub const PROCESSED_CONTENT_TYPE: &str = "video/mp4";

/// Deterministic key of the processed clip for `video_id`.
///
/// Every run for the same video writes the same key, so a redelivered task
/// overwrites rather than duplicates.
pub fn processed_key(video_id: i64) -> String {
    format!("{}/{}_processed.mp4", PROCESSED_PREFIX, video_id)
}

pub fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

/// Resolve a stored location to a key.
///
/// URLs under `base` map to the path after it; bare keys map to themselves;
/// any other URL yields `None`.
pub fn key_for_location(base: &str, location: &str) -> Option<String> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }

    let base = base.trim_end_matches('/');
    if let Some(rest) = location.strip_prefix(base) {
        if let Some(key) = rest.strip_prefix('/') {
            if !key.is_empty() {
                return Some(key.to_string());
            }
        }
    }

    if location.contains("://") {
        return None;
    }

    Some(location.to_string())
}

/// Reject keys that could escape the store root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.contains("..") || key.starts_with('/') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_key_layout() {
        assert_eq!(processed_key(42), "processed/42_processed.mp4");
    }

    #[test]
    fn public_url_joins_without_double_slash() {
        assert_eq!(
            public_url("http://store/", "processed/1_processed.mp4"),
            "http://store/processed/1_processed.mp4"
        );
    }

    #[test]
    fn locations_under_base_resolve_to_keys() {
        assert_eq!(
            key_for_location("http://store", "http://store/a.mp4").as_deref(),
            Some("a.mp4")
        );
        assert_eq!(
            key_for_location("http://store", "uploads/7/a.mp4").as_deref(),
            Some("uploads/7/a.mp4")
        );
    }

    #[test]
    fn foreign_urls_do_not_resolve() {
        assert_eq!(key_for_location("http://store", "https://cdn.example.com/a.mp4"), None);
        // prefix match must end on a path boundary
        assert_eq!(key_for_location("http://store", "http://storefront/a.mp4"), None);
        assert_eq!(key_for_location("http://store", "   "), None);
    }

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("processed/1_processed.mp4").is_ok());
    }
}
