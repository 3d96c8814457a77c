//! Upload boundary: extension policy and image decoding.
//!
//! Everything entering the pipelines passes through here first. Corrupt or
//! unrecognized uploads are rejected as `UnsupportedFormat` before any
//! backend is touched; nothing downstream ever sees undecodable bytes.

use std::path::Path;

use image::RgbImage;

use crate::error::VisionError;

/// Upload extensions accepted for classification and detection.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// Extensions recorded as video sources by the annotated-detection path.
pub const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

/// What kind of source a filename names, by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Image,
    Video,
}

impl SourceKind {
    /// The `source_type` string persisted in detection history.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Image => "image",
            SourceKind::Video => "video",
        }
    }
}

fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// True when the filename carries an accepted image extension.
pub fn allowed_file(filename: &str) -> bool {
    matches!(source_kind(filename), Some(SourceKind::Image))
}

/// Classify a filename as image or video source, or neither.
pub fn source_kind(filename: &str) -> Option<SourceKind> {
    let ext = extension_of(filename)?;
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(SourceKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(SourceKind::Video)
    } else {
        None
    }
}

/// Decode uploaded bytes into an RGB image.
pub fn load_rgb_image(bytes: &[u8]) -> Result<RgbImage, VisionError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| VisionError::UnsupportedFormat(e.to_string()))?;
    Ok(decoded.to_rgb8())
}

/// Read and decode an image file.
pub fn open_rgb_image(path: &Path) -> Result<RgbImage, VisionError> {
    let bytes = std::fs::read(path).map_err(|e| {
        VisionError::UnsupportedFormat(format!("failed to read {}: {}", path.display(), e))
    })?;
    load_rgb_image(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_policy_matches_upload_rules() {
        assert!(allowed_file("cat.jpg"));
        assert!(allowed_file("photo.archive.PNG"));
        assert!(allowed_file("pic.webp"));
        assert!(!allowed_file("document.pdf"));
        assert!(!allowed_file("noext"));
        assert!(!allowed_file("trailingdot."));
        assert!(!allowed_file(""));
    }

    #[test]
    fn video_extensions_classify_as_video() {
        assert_eq!(source_kind("clip.mp4"), Some(SourceKind::Video));
        assert_eq!(source_kind("clip.MKV"), Some(SourceKind::Video));
        assert_eq!(SourceKind::Video.as_str(), "video");
        assert_eq!(source_kind("clip.txt"), None);
    }

    #[test]
    fn corrupt_bytes_are_rejected() {
        let err = load_rgb_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, VisionError::UnsupportedFormat(_)));
    }

    #[test]
    fn valid_png_round_trips() {
        let img = image::RgbImage::from_fn(8, 6, |x, y| image::Rgb([x as u8, y as u8, 7]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();

        let decoded = load_rgb_image(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (8, 6));
    }
}
