//! Geometric composition: fit the subject onto the fixed-size canvas.
//!
//! The normalised photo is scaled so its width equals the canvas width
//! (aspect ratio preserved, Lanczos3), then centred vertically inside the
//! head region of an all-white canvas. A scaled image taller than the head
//! region sits flush at the top and runs into the footer; the caption stage
//! paints the footer white before drawing, so nothing is cropped here.
//! Sources whose aspect ratio is far from the canvas's end up letterboxed
//! with white bands, which is expected.

use crate::config::PixelGeometry;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tracing::debug;

/// The canvas background.
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Height of `src_w x src_h` after scaling its width to `target_w`.
///
/// Floors, like integer division would, and never returns 0.
pub fn scaled_height(src_w: u32, src_h: u32, target_w: u32) -> u32 {
    ((src_h as u64 * target_w as u64) / src_w.max(1) as u64).max(1) as u32
}

/// Vertical offset that centres `scaled_h` in a head region of `head_px`,
/// clamped at 0 when the image is taller than the region.
pub fn head_offset(head_px: u32, scaled_h: u32) -> u32 {
    head_px.saturating_sub(scaled_h) / 2
}

/// Scale `image` to the canvas width and place it in the head region.
///
/// The returned canvas always has exactly `geometry.width_px x
/// geometry.height_px` pixels.
pub fn compose(image: &RgbImage, geometry: &PixelGeometry) -> RgbImage {
    let target_w = geometry.width_px;
    let new_h = scaled_height(image.width(), image.height(), target_w);
    let resized = imageops::resize(image, target_w, new_h, FilterType::Lanczos3);

    let mut canvas = RgbImage::from_pixel(geometry.width_px, geometry.height_px, WHITE);
    let y_off = head_offset(geometry.head_px, new_h);
    imageops::replace(&mut canvas, &resized, 0, y_off as i64);

    debug!(
        "Composed {}x{} → {}x{} at y={} on {}x{} canvas",
        image.width(),
        image.height(),
        target_w,
        new_h,
        y_off,
        geometry.width_px,
        geometry.height_px
    );
    canvas
}
