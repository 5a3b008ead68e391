//! Background normalisation: cut the subject out and put it on white.
//!
//! A [`Segmenter`] turns an RGB image into a per-pixel foreground opacity
//! mask. [`normalize_background`] then blends every pixel toward white by
//! that opacity:
//!
//! ```text
//! out = fg * alpha + 255 * (1 - alpha)
//! ```
//!
//! Two backends ship with the crate:
//!
//! - [`BorderKeySegmenter`] (always available) keys out the backdrop colour
//!   sampled from a ring around the image border. It suits the usual case of
//!   a subject in front of a roughly uniform wall.
//! - `OnnxSegmenter` (feature `onnx`) runs a U²-Net-family model.
//!
//! A mask that marks (almost) nothing as foreground is a failure, never a
//! pass-through: returning the original background unchanged would produce
//! a photograph that silently violates the document rules.

use crate::error::DocPhotoError;
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use tracing::debug;

/// Per-pixel foreground opacity, 0 = background, 255 = subject.
pub type AlphaMask = GrayImage;

/// A foreground/background segmentation capability.
///
/// Implementations are shared between concurrent invocations, so they must
/// be `Send + Sync` and treat any model state as read-only (or guard it).
pub trait Segmenter: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// Produce a mask with the same dimensions as `image`.
    fn segment(&self, image: &RgbImage) -> Result<AlphaMask, DocPhotoError>;
}

/// Replace the background of `source` with opaque white.
///
/// The source's own alpha channel (if any) is multiplied into the mask, so
/// transparent regions of a PNG upload also end up white.
///
/// # Errors
/// [`DocPhotoError::SegmentationFailure`] when the segmenter fails, returns
/// a mask of the wrong size, or finds less than `min_coverage` foreground.
pub fn normalize_background(
    source: &DynamicImage,
    segmenter: &dyn Segmenter,
    min_coverage: f32,
) -> Result<RgbImage, DocPhotoError> {
    let rgba = source.to_rgba8();
    let rgb = DynamicImage::ImageRgba8(rgba.clone()).to_rgb8();

    let mask = segmenter.segment(&rgb)?;
    if mask.dimensions() != rgb.dimensions() {
        return Err(DocPhotoError::SegmentationFailure {
            segmenter: segmenter.name().to_string(),
            detail: format!(
                "mask is {}x{}, image is {}x{}",
                mask.width(),
                mask.height(),
                rgb.width(),
                rgb.height()
            ),
        });
    }

    let coverage = foreground_coverage(&mask);
    debug!(
        "{} mask: {:.2}% foreground",
        segmenter.name(),
        coverage * 100.0
    );
    if coverage < min_coverage {
        return Err(DocPhotoError::SegmentationFailure {
            segmenter: segmenter.name().to_string(),
            detail: format!(
                "no subject found ({:.3}% foreground, need ≥ {:.3}%)",
                coverage * 100.0,
                min_coverage * 100.0
            ),
        });
    }

    let mut out = RgbImage::new(rgb.width(), rgb.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let m = mask.get_pixel(x, y).0[0];
        let alpha = (a as f32 / 255.0) * (m as f32 / 255.0);
        let inv = 1.0 - alpha;
        out.put_pixel(
            x,
            y,
            image::Rgb([
                (r as f32 * alpha + 255.0 * inv).round() as u8,
                (g as f32 * alpha + 255.0 * inv).round() as u8,
                (b as f32 * alpha + 255.0 * inv).round() as u8,
            ]),
        );
    }
    Ok(out)
}

/// Mean opacity of the mask in `[0, 1]`.
pub fn foreground_coverage(mask: &AlphaMask) -> f32 {
    let total = mask.width() as u64 * mask.height() as u64;
    if total == 0 {
        return 0.0;
    }
    let sum: u64 = mask.pixels().map(|p| p.0[0] as u64).sum();
    sum as f32 / (total as f32 * 255.0)
}

// ── BorderKeySegmenter ───────────────────────────────────────────────────

/// Keys out the backdrop colour sampled from the image border.
///
/// The backdrop is estimated as the median colour of a ring `border_fraction`
/// of the shorter side wide. Each pixel's opacity ramps smoothly from 0 at
/// `inner` to 1 at `outer` Euclidean RGB distance from that colour; the
/// thresholds widen with the ring's own spread so that a noisy or
/// gradient wall is still keyed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderKeySegmenter {
    /// Ring width as a share of the shorter side. Default: 0.03.
    pub border_fraction: f32,
    /// Distance at or below which a pixel is background. Default: 24.
    pub inner: f32,
    /// Distance at or above which a pixel is foreground. Default: 56.
    pub outer: f32,
}

impl Default for BorderKeySegmenter {
    fn default() -> Self {
        Self {
            border_fraction: 0.03,
            inner: 24.0,
            outer: 56.0,
        }
    }
}

impl BorderKeySegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    fn ring_width(&self, w: u32, h: u32) -> u32 {
        let short = w.min(h) as f32;
        ((short * self.border_fraction).round() as u32).clamp(1, (w.min(h) / 2).max(1))
    }

    /// Median backdrop colour and the mean distance of ring pixels from it.
    fn backdrop(&self, image: &RgbImage) -> ([f32; 3], f32) {
        let (w, h) = image.dimensions();
        let ring = self.ring_width(w, h);
        let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for (x, y, px) in image.enumerate_pixels() {
            if x < ring || y < ring || x >= w - ring || y >= h - ring {
                for c in 0..3 {
                    channels[c].push(px.0[c]);
                }
            }
        }
        let mut key = [0f32; 3];
        for (c, values) in channels.iter_mut().enumerate() {
            values.sort_unstable();
            key[c] = values[values.len() / 2] as f32;
        }

        let count = channels[0].len().max(1) as f32;
        let spread: f32 = (0..channels[0].len())
            .map(|i| {
                let d = [
                    channels[0][i] as f32 - key[0],
                    channels[1][i] as f32 - key[1],
                    channels[2][i] as f32 - key[2],
                ];
                (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
            })
            .sum::<f32>()
            / count;
        (key, spread)
    }
}

impl Segmenter for BorderKeySegmenter {
    fn name(&self) -> &str {
        "border-key"
    }

    fn segment(&self, image: &RgbImage) -> Result<AlphaMask, DocPhotoError> {
        let (w, h) = image.dimensions();
        if w < 3 || h < 3 {
            return Err(DocPhotoError::SegmentationFailure {
                segmenter: self.name().to_string(),
                detail: format!("image {w}x{h} is too small to sample a backdrop"),
            });
        }

        let (key, spread) = self.backdrop(image);
        let inner = self.inner + spread;
        let outer = (self.outer + spread).max(inner + 1.0);
        debug!(
            "border-key backdrop rgb({:.0},{:.0},{:.0}) spread {:.1}",
            key[0], key[1], key[2], spread
        );

        let mut mask = GrayImage::new(w, h);
        for (x, y, px) in image.enumerate_pixels() {
            let d = [
                px.0[0] as f32 - key[0],
                px.0[1] as f32 - key[1],
                px.0[2] as f32 - key[2],
            ];
            let dist = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
            let t = ((dist - inner) / (outer - inner)).clamp(0.0, 1.0);
            let smooth = t * t * (3.0 - 2.0 * t);
            mask.put_pixel(x, y, Luma([(smooth * 255.0).round() as u8]));
        }
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba, RgbaImage};

    /// Green wall with a dark rectangle in the middle.
    fn subject_on_wall(w: u32, h: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(w, h, Rgb([40, 160, 60]));
        for y in h / 4..h * 3 / 4 {
            for x in w / 3..w * 2 / 3 {
                img.put_pixel(x, y, Rgb([90, 50, 30]));
            }
        }
        img
    }

    struct FixedMask(u8);

    impl Segmenter for FixedMask {
        fn name(&self) -> &str {
            "fixed"
        }
        fn segment(&self, image: &RgbImage) -> Result<AlphaMask, DocPhotoError> {
            Ok(GrayImage::from_pixel(image.width(), image.height(), Luma([self.0])))
        }
    }

    struct WrongSize;

    impl Segmenter for WrongSize {
        fn name(&self) -> &str {
            "wrong-size"
        }
        fn segment(&self, _image: &RgbImage) -> Result<AlphaMask, DocPhotoError> {
            Ok(GrayImage::new(1, 1))
        }
    }

    #[test]
    fn border_key_separates_subject_from_wall() {
        let img = subject_on_wall(120, 90);
        let mask = BorderKeySegmenter::new().segment(&img).unwrap();
        assert_eq!(mask.get_pixel(2, 2).0[0], 0);
        assert_eq!(mask.get_pixel(60, 45).0[0], 255);
    }

    #[test]
    fn wall_becomes_white_and_subject_is_kept() {
        let img = DynamicImage::ImageRgb8(subject_on_wall(120, 90));
        let out = normalize_background(&img, &BorderKeySegmenter::new(), 0.005).unwrap();
        assert_eq!(out.get_pixel(1, 1), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(60, 45), &Rgb([90, 50, 30]));
    }

    #[test]
    fn blank_image_is_a_segmentation_failure() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([200, 200, 200])));
        let err = normalize_background(&img, &BorderKeySegmenter::new(), 0.005).unwrap_err();
        assert!(matches!(err, DocPhotoError::SegmentationFailure { .. }));
    }

    #[test]
    fn tiny_image_is_a_segmentation_failure() {
        let img = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        assert!(BorderKeySegmenter::new().segment(&img).is_err());
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let img = DynamicImage::ImageRgb8(subject_on_wall(20, 20));
        let err = normalize_background(&img, &WrongSize, 0.0).unwrap_err();
        assert!(err.to_string().contains("wrong-size"));
    }

    #[test]
    fn half_alpha_blends_toward_white() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 0])));
        let out = normalize_background(&img, &FixedMask(128), 0.0).unwrap();
        let px = out.get_pixel(0, 0);
        assert_eq!(px.0[0], 255);
        assert!((px.0[1] as i16 - 127).abs() <= 1, "got {:?}", px);
    }

    #[test]
    fn transparent_source_pixels_become_white() {
        let mut rgba = RgbaImage::from_pixel(4, 4, Rgba([10, 10, 10, 255]));
        rgba.put_pixel(0, 0, Rgba([10, 10, 10, 0]));
        let img = DynamicImage::ImageRgba8(rgba);
        let out = normalize_background(&img, &FixedMask(255), 0.0).unwrap();
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(out.get_pixel(1, 1), &Rgb([10, 10, 10]));
    }

    #[test]
    fn coverage_of_constant_masks() {
        assert_eq!(foreground_coverage(&GrayImage::new(5, 5)), 0.0);
        let full = GrayImage::from_pixel(5, 5, Luma([255]));
        assert!((foreground_coverage(&full) - 1.0).abs() < f32::EPSILON);
    }
}
