//! Asset reference fields and remote-locator detection.

/// Settings fields that may hold a local path or a remote URL to an
/// initialization or mask asset.
pub const ASSET_FIELDS: &[&str] = &["video_init_path", "video_mask_path", "init_image", "mask_file"];

/// Schemes recognised as remote locators.
const REMOTE_SCHEMES: &[&str] = &["http://", "https://"];

/// Longest file extension carried over to a staged copy.
const MAX_EXTENSION_LEN: usize = 8;

/// `true` if `value` starts with a recognised URI scheme.
pub fn is_remote_locator(value: &str) -> bool {
    let lower = value.trim_start().to_ascii_lowercase();
    REMOTE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

/// File extension of the locator's path, without query or fragment.
///
/// Returned with a leading dot (e.g. `.mp4`) so it can be used as a temp
/// file suffix.
pub fn locator_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = path.rsplit('/').next()?;
    let (stem, ext) = last_segment.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_detection() {
        assert!(is_remote_locator("https://cdn.example.com/init.mp4"));
        assert!(is_remote_locator("HTTP://host/x.png"));
        assert!(!is_remote_locator("/workspace/init.mp4"));
        assert!(!is_remote_locator("relative/https://x"));
        assert!(!is_remote_locator(""));
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(locator_extension("https://h/a/clip.MP4?sig=1").as_deref(), Some(".mp4"));
        assert_eq!(locator_extension("https://h/a/mask.png#frag").as_deref(), Some(".png"));
        assert_eq!(locator_extension("https://h/a/noext"), None);
        assert_eq!(locator_extension("https://h/a/.hidden"), None);
    }
}
