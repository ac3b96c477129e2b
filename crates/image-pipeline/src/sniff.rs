//! Content-based type detection

use glimpse_common::{Error, ImageKind, Result};
use image::ImageFormat;

/// Determine the real image type from the leading bytes.
///
/// The declared filename and any client MIME header are never consulted.
pub fn sniff(bytes: &[u8]) -> Result<ImageKind> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => Ok(ImageKind::Jpeg),
        Ok(ImageFormat::Png) => Ok(ImageKind::Png),
        Ok(ImageFormat::Gif) => Ok(ImageKind::Gif),
        Ok(other) => Err(Error::InvalidType(format!("{:?}", other).to_lowercase())),
        Err(_) => Err(Error::InvalidType("unrecognized content".to_string())),
    }
}

pub(crate) fn image_format(kind: ImageKind) -> ImageFormat {
    match kind {
        ImageKind::Jpeg => ImageFormat::Jpeg,
        ImageKind::Png => ImageFormat::Png,
        ImageKind::Gif => ImageFormat::Gif,
    }
}
