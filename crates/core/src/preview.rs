//! Preview frame downsampling and transport encoding.
//!
//! Previews are shrunk so their longest side fits `max_side` (aspect
//! ratio preserved), encoded as JPEG, and wrapped in a base64 data URI
//! so they can ride inside a JSON progress event.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;

use crate::job::{DEFAULT_PREVIEW_JPEG_QUALITY, DEFAULT_PREVIEW_MAX_SIDE};

/// Data URI prefix for encoded previews.
pub const PREVIEW_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Preview tuning for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewOptions {
    /// Longest permitted side in pixels.
    pub max_side: u32,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_PREVIEW_MAX_SIDE,
            jpeg_quality: DEFAULT_PREVIEW_JPEG_QUALITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("Preview image is empty")]
    Empty,

    #[error("Preview encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Shrink `img` so neither side exceeds `max_side`. Smaller images are
/// returned unchanged.
pub fn downsample(img: &DynamicImage, max_side: u32) -> DynamicImage {
    let max_side = max_side.max(1);
    if img.width() <= max_side && img.height() <= max_side {
        return img.clone();
    }
    img.thumbnail(max_side, max_side)
}

/// Downsample and encode a preview into a JPEG data URI.
pub fn encode_preview(img: &DynamicImage, opts: PreviewOptions) -> Result<String, PreviewError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(PreviewError::Empty);
    }

    let rgb = downsample(img, opts.max_side).to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, opts.jpeg_quality.clamp(1, 100)).encode_image(&rgb)?;

    Ok(format!(
        "{PREVIEW_DATA_URI_PREFIX}{}",
        BASE64.encode(buf.into_inner())
    ))
}

/// [`encode_preview`], with failure folded into `None`.
pub fn try_encode_preview(img: &DynamicImage, opts: PreviewOptions) -> Option<String> {
    encode_preview(img, opts).ok()
}
