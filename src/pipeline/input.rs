//! Input resolution: read an uploaded photo and decode it.
//!
//! Every check here runs before any pipeline stage, so a bad upload is
//! reported as an input error and nothing is written. The format is sniffed
//! from the magic bytes rather than trusted from a file extension: chat
//! clients routinely rename WebP uploads to `.jpg`.

use crate::error::DocPhotoError;
use image::{DynamicImage, ImageFormat};
use std::path::Path;
use tracing::debug;

/// A decoded upload.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub image: DynamicImage,
    /// Format detected from the magic bytes.
    pub format: ImageFormat,
    /// Size of the upload in bytes.
    pub byte_len: usize,
}

impl SourceImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Decode raw upload bytes.
///
/// # Errors
/// - [`DocPhotoError::EmptyInput`] for a zero-length buffer
/// - [`DocPhotoError::UnreadableImage`] when the format is unknown or the
///   data is corrupt
/// - [`DocPhotoError::ZeroDimensions`] for a degenerate image
pub fn decode_source(bytes: &[u8]) -> Result<SourceImage, DocPhotoError> {
    if bytes.is_empty() {
        return Err(DocPhotoError::EmptyInput);
    }

    let format = image::guess_format(bytes).map_err(|e| DocPhotoError::UnreadableImage {
        detail: format!("{e} (first bytes: {:02x?})", &bytes[..bytes.len().min(4)]),
    })?;

    let image = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        DocPhotoError::UnreadableImage {
            detail: e.to_string(),
        }
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(DocPhotoError::ZeroDimensions);
    }

    debug!(
        "Decoded {:?} upload: {}x{} px from {} bytes",
        format,
        image.width(),
        image.height(),
        bytes.len()
    );

    Ok(SourceImage {
        image,
        format,
        byte_len: bytes.len(),
    })
}

/// Read a photo from disk, mapping I/O failures to input errors.
pub fn read_source(path: &Path) -> Result<Vec<u8>, DocPhotoError> {
    std::fs::read(path).map_err(|e| map_read_error(path, e))
}

/// Async variant of [`read_source`].
pub async fn read_source_async(path: &Path) -> Result<Vec<u8>, DocPhotoError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| map_read_error(path, e))
}

fn map_read_error(path: &Path, e: std::io::Error) -> DocPhotoError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => DocPhotoError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => DocPhotoError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => DocPhotoError::UnreadableImage {
            detail: format!("{}: {e}", path.display()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageEncoder, Rgb, RgbImage};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([10, 20, 30]));
        let mut buf = Vec::new();
        image::codecs::png::PngEncoder::new(&mut buf)
            .write_image(img.as_raw(), w, h, image::ExtendedColorType::Rgb8)
            .unwrap();
        buf
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(decode_source(&[]), Err(DocPhotoError::EmptyInput)));
    }

    #[test]
    fn garbage_is_unreadable() {
        let err = decode_source(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DocPhotoError::UnreadableImage { .. }));
        assert!(err.is_input_error());
    }

    #[test]
    fn truncated_png_is_unreadable() {
        let bytes = png_bytes(16, 16);
        let err = decode_source(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, DocPhotoError::UnreadableImage { .. }));
    }

    #[test]
    fn png_decodes_with_detected_format() {
        let src = decode_source(&png_bytes(12, 7)).unwrap();
        assert_eq!(src.format, ImageFormat::Png);
        assert_eq!((src.width(), src.height()), (12, 7));
    }

    #[test]
    fn missing_file_maps_to_file_not_found() {
        let err = read_source(Path::new("/definitely/not/here.jpg")).unwrap_err();
        assert!(matches!(err, DocPhotoError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn async_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.png");
        std::fs::write(&path, png_bytes(4, 4)).unwrap();
        let bytes = read_source_async(&path).await.unwrap();
        assert!(decode_source(&bytes).is_ok());
    }
}
