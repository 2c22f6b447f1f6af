//! Object-storage naming: upload keys and direct object URLs.

use uuid::Uuid;

/// Extension of every published artifact.
pub const VIDEO_EXTENSION: &str = "mp4";

/// Default validity of a signed download URL (24 hours).
pub const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 24 * 60 * 60;

/// Normalise a configured key prefix: surrounding slashes are dropped and
/// an empty prefix becomes `None`.
pub fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Build `{prefix}/{id}.mp4`, or `{id}.mp4` without a prefix.
pub fn video_key(prefix: Option<&str>, id: Uuid) -> String {
    match prefix {
        Some(p) => format!("{p}/{id}.{VIDEO_EXTENSION}"),
        None => format!("{id}.{VIDEO_EXTENSION}"),
    }
}

/// A never-before-used key for a new artifact.
pub fn fresh_video_key(prefix: Option<&str>) -> String {
    video_key(prefix, Uuid::new_v4())
}

/// Path-style location of an object: `{endpoint}/{bucket}/{key}`.
///
/// The object may not be publicly readable; callers flag such URLs as
/// requiring authenticated access.
pub fn direct_object_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!("{}/{bucket}/{key}", endpoint.trim_end_matches('/'))
}
