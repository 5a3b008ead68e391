//! JPEG encoding under a byte budget.
//!
//! The finished canvas is encoded as a progressive, 4:4:4 JPEG carrying the
//! target resolution in its JFIF header. The encoder walks the
//! [`crate::config::QualityLadder`] and keeps the highest level whose output fits under
//! `max_bytes`:
//!
//! - [`SearchStrategy::Descending`] tries levels highest first and stops at
//!   the first that fits (at most `levels` encodes).
//! - [`SearchStrategy::Binary`] checks the lowest level, then bisects. Same
//!   answer whenever size falls monotonically with quality.
//!
//! If even the lowest level is too large the lowest-quality encoding is kept
//! and flagged with [`PipelineWarning::EncodingBudgetUnmet`].
//!
//! An encoding smaller than `min_bytes` is padded up to the floor:
//!
//! - [`PaddingStrategy::CommentSegment`] inserts COM (`FF FE`) segments
//!   after the JFIF APP0 header, so SOI + APP0 stay at the front of the file.
//!   Each segment costs 4 bytes of header plus up to 65 533 bytes of payload.
//!   A deficit under 4 bytes is too small for a segment and is appended as
//!   NUL bytes after EOI instead.
//! - [`PaddingStrategy::TrailingZeros`] appends NUL bytes after EOI.
//!
//! Both strategies reach the floor exactly, and the padded length is checked
//! against `max_bytes` once more before the result is returned.

use crate::config::{PaddingStrategy, SearchStrategy, TargetSpec};
use crate::error::{DocPhotoError, PipelineWarning};
use image::imageops;
use image::RgbImage;
use jpeg_encoder::{ColorType, Density, Encoder, SamplingFactor};
use tracing::{debug, warn};

/// Largest payload a single COM segment can carry (length field is u16 and
/// counts itself).
pub const MAX_COMMENT_PAYLOAD: usize = u16::MAX as usize - 2;
/// Marker plus length field of a COM segment.
const COMMENT_OVERHEAD: usize = 4;

/// Gaussian sigma applied to preview images.
pub const PREVIEW_SIGMA: f32 = 5.0;
/// JPEG quality of preview images.
pub const PREVIEW_QUALITY: u8 = 50;

/// Outcome of [`encode_within_budget`].
#[derive(Debug, Clone)]
pub struct EncodedPhoto {
    /// Final file contents, padding included.
    pub bytes: Vec<u8>,
    /// Quality level of the kept encoding.
    pub quality: u8,
    /// Length of the compressed stream before padding.
    pub compressed_len: usize,
    /// Bytes added by padding.
    pub padding: usize,
    /// Number of encodes performed.
    pub attempts: usize,
    /// Set when no level met the ceiling.
    pub shortfall: Option<PipelineWarning>,
}

impl EncodedPhoto {
    pub fn budget_met(&self) -> bool {
        self.shortfall.is_none()
    }
}

/// Encode `canvas` once at `quality`.
pub fn encode_jpeg(canvas: &RgbImage, quality: u8, dpi: u32) -> Result<Vec<u8>, DocPhotoError> {
    let (w, h) = canvas.dimensions();
    let (w16, h16) = match (u16::try_from(w), u16::try_from(h)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(DocPhotoError::EncodingFailed {
                quality,
                detail: format!("{w}x{h} exceeds the JPEG size limit"),
            })
        }
    };
    let dpi = dpi.min(u16::MAX as u32) as u16;

    let mut buf = Vec::new();
    let mut encoder = Encoder::new(&mut buf, quality);
    encoder.set_progressive(true);
    encoder.set_sampling_factor(SamplingFactor::R_4_4_4);
    encoder.set_density(Density::Inch { x: dpi, y: dpi });
    encoder
        .encode(canvas.as_raw(), w16, h16, ColorType::Rgb)
        .map_err(|e| DocPhotoError::EncodingFailed {
            quality,
            detail: e.to_string(),
        })?;
    Ok(buf)
}

/// Find the highest ladder level that fits `target.max_bytes`, then pad up
/// to `target.min_bytes`.
pub fn encode_within_budget(
    canvas: &RgbImage,
    target: &TargetSpec,
    search: SearchStrategy,
    padding: PaddingStrategy,
) -> Result<EncodedPhoto, DocPhotoError> {
    let levels = target.quality.levels();
    if levels.is_empty() {
        return Err(DocPhotoError::InvalidConfig(
            "quality ladder has no levels".into(),
        ));
    }

    let mut search_state = LadderSearch::new(canvas, target.dpi, &levels);
    let found = match search {
        SearchStrategy::Descending => search_state.descending(target.max_bytes)?,
        SearchStrategy::Binary => search_state.binary(target.max_bytes)?,
    };
    let attempts = search_state.attempts;

    let (index, fits) = found;
    let quality = levels[index];
    let compressed = search_state.take(index);
    let compressed_len = compressed.len();

    let bytes = if compressed_len < target.min_bytes {
        match padding {
            PaddingStrategy::CommentSegment => pad_with_comments(compressed, target.min_bytes),
            PaddingStrategy::TrailingZeros => pad_with_zeros(compressed, target.min_bytes),
        }
    } else {
        compressed
    };
    let padded = bytes.len() - compressed_len;

    let shortfall = if fits && bytes.len() <= target.max_bytes {
        None
    } else {
        warn!(
            "No quality level in {:?} met the {}-byte ceiling; keeping q{} at {} bytes",
            target.quality,
            target.max_bytes,
            quality,
            bytes.len()
        );
        Some(PipelineWarning::EncodingBudgetUnmet {
            max_bytes: target.max_bytes,
            smallest_bytes: bytes.len(),
            quality,
        })
    };

    debug!(
        "Encoded q{} → {} bytes (+{} padding) after {} attempt(s)",
        quality, compressed_len, padded, attempts
    );

    Ok(EncodedPhoto {
        bytes,
        quality,
        compressed_len,
        padding: padded,
        attempts,
        shortfall,
    })
}

/// Memoised encodes over one ladder.
struct LadderSearch<'a> {
    canvas: &'a RgbImage,
    dpi: u32,
    levels: &'a [u8],
    cache: Vec<Option<Vec<u8>>>,
    attempts: usize,
}

impl<'a> LadderSearch<'a> {
    fn new(canvas: &'a RgbImage, dpi: u32, levels: &'a [u8]) -> Self {
        Self {
            canvas,
            dpi,
            levels,
            cache: vec![None; levels.len()],
            attempts: 0,
        }
    }

    fn size_at(&mut self, index: usize) -> Result<usize, DocPhotoError> {
        if let Some(bytes) = &self.cache[index] {
            return Ok(bytes.len());
        }
        let bytes = encode_jpeg(self.canvas, self.levels[index], self.dpi)?;
        self.attempts += 1;
        debug!("  q{} → {} bytes", self.levels[index], bytes.len());
        let len = bytes.len();
        self.cache[index] = Some(bytes);
        Ok(len)
    }

    fn take(&mut self, index: usize) -> Vec<u8> {
        self.cache[index].take().unwrap_or_default()
    }

    /// `(index, fits)`; the last index with `fits = false` when nothing fits.
    fn descending(&mut self, max: usize) -> Result<(usize, bool), DocPhotoError> {
        for i in 0..self.levels.len() {
            if self.size_at(i)? <= max {
                return Ok((i, true));
            }
        }
        Ok((self.levels.len() - 1, false))
    }

    fn binary(&mut self, max: usize) -> Result<(usize, bool), DocPhotoError> {
        let last = self.levels.len() - 1;
        if self.size_at(last)? > max {
            return Ok((last, false));
        }
        // Invariant: `hi` fits.
        let (mut lo, mut hi) = (0, last);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.size_at(mid)? <= max {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok((hi, true))
    }
}

// ── Padding ──────────────────────────────────────────────────────────────

/// Grow `jpeg` to exactly `min_len` with COM segments placed after the
/// APP0 header (or after SOI when there is none).
///
/// A deficit under 4 bytes cannot hold a segment and is appended after EOI
/// as NUL bytes.
pub fn pad_with_comments(jpeg: Vec<u8>, min_len: usize) -> Vec<u8> {
    let deficit = min_len.saturating_sub(jpeg.len());
    if deficit == 0 || jpeg.len() < 2 {
        return jpeg;
    }
    if deficit < COMMENT_OVERHEAD {
        return pad_with_zeros(jpeg, min_len);
    }

    let mut remaining = deficit;
    let mut segments = Vec::with_capacity(deficit);
    while remaining > 0 {
        let mut total = remaining.min(MAX_COMMENT_PAYLOAD + COMMENT_OVERHEAD);
        // Leave at least one full header's worth for the next segment.
        if remaining > total && remaining - total < COMMENT_OVERHEAD {
            total -= COMMENT_OVERHEAD;
        }
        let payload = total - COMMENT_OVERHEAD;
        let len_field = (payload + 2) as u16;
        segments.extend_from_slice(&[0xFF, 0xFE]);
        segments.extend_from_slice(&len_field.to_be_bytes());
        segments.resize(segments.len() + payload, 0);
        remaining -= total;
    }

    let at = comment_insert_offset(&jpeg);
    let mut out = Vec::with_capacity(jpeg.len() + segments.len());
    out.extend_from_slice(&jpeg[..at]);
    out.extend_from_slice(&segments);
    out.extend_from_slice(&jpeg[at..]);
    out
}

/// Offset just past SOI, or past the APP0 segment when it follows SOI.
fn comment_insert_offset(jpeg: &[u8]) -> usize {
    const SOI_LEN: usize = 2;
    if jpeg.len() >= SOI_LEN + 4 && jpeg[2..4] == [0xFF, 0xE0] {
        let seg_len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize;
        let end = SOI_LEN + 2 + seg_len;
        if end <= jpeg.len() {
            return end;
        }
    }
    SOI_LEN
}

/// Grow `jpeg` to exactly `min_len` by appending NUL bytes after EOI.
pub fn pad_with_zeros(mut jpeg: Vec<u8>, min_len: usize) -> Vec<u8> {
    if jpeg.len() < min_len {
        jpeg.resize(min_len, 0);
    }
    jpeg
}

// ── Preview ──────────────────────────────────────────────────────────────

/// A heavily blurred, low-quality copy of a finished photograph, for showing
/// before payment. Decodes `jpeg` so it also works on files read from disk.
pub fn make_preview(jpeg: &[u8], dpi: u32) -> Result<Vec<u8>, DocPhotoError> {
    let image = image::load_from_memory(jpeg)
        .map_err(|e| DocPhotoError::Internal(format!("cannot decode photo for preview: {e}")))?
        .to_rgb8();
    let blurred = imageops::blur(&image, PREVIEW_SIGMA);
    encode_jpeg(&blurred, PREVIEW_QUALITY, dpi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityLadder;

    /// Deterministic high-entropy image that stays large at every quality.
    fn noisy(w: u32, h: u32) -> RgbImage {
        let mut state: u32 = 0x1234_5678;
        RgbImage::from_fn(w, h, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let b = state.to_le_bytes();
            image::Rgb([b[0], b[1], b[2]])
        })
    }

    /// Smooth gradient with some structure; size grows with quality.
    fn portrait_like(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let r = ((x * 255) / w.max(1)) as u8;
            let g = ((y * 255) / h.max(1)) as u8;
            let b = (((x ^ y) & 0x1F) * 8) as u8;
            image::Rgb([r, g, b])
        })
    }

    fn target(min: usize, max: usize) -> TargetSpec {
        TargetSpec {
            min_bytes: min,
            max_bytes: max,
            ..TargetSpec::default()
        }
    }

    #[test]
    fn output_is_a_decodable_jpeg_with_density() {
        let canvas = portrait_like(276, 354);
        let bytes = encode_jpeg(&canvas, 90, 200).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (276, 354));
    }

    #[test]
    fn descending_keeps_first_level_that_fits() {
        let canvas = portrait_like(276, 354);
        let q95 = encode_jpeg(&canvas, 95, 200).unwrap().len();
        let q90 = encode_jpeg(&canvas, 90, 200).unwrap().len();
        assert!(q90 < q95);

        // ceiling between the two: q95 rejected, q90 accepted
        let t = target(0, q95 - 1);
        let out = encode_within_budget(
            &canvas,
            &t,
            SearchStrategy::Descending,
            PaddingStrategy::CommentSegment,
        )
        .unwrap();
        assert!(out.budget_met());
        assert!(out.quality <= 90);
        assert!(out.bytes.len() <= t.max_bytes);
    }

    #[test]
    fn binary_agrees_with_descending() {
        let canvas = portrait_like(200, 200);
        for max in [4_000usize, 8_000, 20_000, 1_000_000] {
            let t = target(0, max);
            let a = encode_within_budget(
                &canvas,
                &t,
                SearchStrategy::Descending,
                PaddingStrategy::CommentSegment,
            )
            .unwrap();
            let b = encode_within_budget(
                &canvas,
                &t,
                SearchStrategy::Binary,
                PaddingStrategy::CommentSegment,
            )
            .unwrap();
            // descending returns the first fit; bisection can only land at or below it
            assert!(b.quality <= a.quality, "max {max}");
            assert_eq!(a.budget_met(), b.budget_met());
            assert!(b.attempts <= a.attempts.max(6));
        }
    }

    #[test]
    fn unreachable_ceiling_keeps_lowest_quality_with_warning() {
        let canvas = noisy(276, 354);
        let t = target(500, 1_000);
        let out = encode_within_budget(
            &canvas,
            &t,
            SearchStrategy::Descending,
            PaddingStrategy::CommentSegment,
        )
        .unwrap();
        assert_eq!(out.quality, 5);
        assert_eq!(out.attempts, 19);
        match out.shortfall {
            Some(PipelineWarning::EncodingBudgetUnmet {
                max_bytes, quality, ..
            }) => {
                assert_eq!(max_bytes, 1_000);
                assert_eq!(quality, 5);
            }
            other => panic!("expected shortfall, got {other:?}"),
        }
    }

    /// Offset of the first segment after the APP0 header.
    fn after_app0(jpeg: &[u8]) -> usize {
        4 + u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize
    }

    #[test]
    fn comment_padding_reaches_floor_and_still_decodes() {
        let canvas = portrait_like(64, 64);
        let jpeg = encode_jpeg(&canvas, 80, 200).unwrap();
        let padded = pad_with_comments(jpeg.clone(), jpeg.len() + 70_000);
        assert_eq!(padded.len(), jpeg.len() + 70_000);
        let at = after_app0(&jpeg);
        assert_eq!(&padded[at..at + 2], &[0xFF, 0xFE]);
        let decoded = image::load_from_memory(&padded).unwrap();
        assert_eq!(decoded.width(), 64);
    }

    #[test]
    fn comment_padding_keeps_jfif_header_first() {
        let jpeg = encode_jpeg(&portrait_like(276, 354), 90, 200).unwrap();
        assert_eq!(&jpeg[2..4], &[0xFF, 0xE0]);
        assert_eq!(&jpeg[6..11], b"JFIF\0");

        let padded = pad_with_comments(jpeg.clone(), jpeg.len() + 1_000);
        assert_eq!(&padded[..2], &[0xFF, 0xD8]);
        assert_eq!(&padded[2..4], &[0xFF, 0xE0]);
        assert_eq!(&padded[6..11], b"JFIF\0");
        // APP0 header (including the density fields) is untouched
        let at = after_app0(&jpeg);
        assert_eq!(&padded[..at], &jpeg[..at]);
        assert_eq!(&padded[at..at + 2], &[0xFF, 0xFE]);
        assert_eq!(&padded[at + 1_000..], &jpeg[at..]);
    }

    #[test]
    fn comment_padding_is_exact_for_every_small_deficit() {
        let jpeg = encode_jpeg(&portrait_like(16, 16), 80, 200).unwrap();
        for deficit in 1..=8 {
            let padded = pad_with_comments(jpeg.clone(), jpeg.len() + deficit);
            assert_eq!(padded.len(), jpeg.len() + deficit, "deficit {deficit}");
            assert_eq!(&padded[6..11], b"JFIF\0");
            assert!(image::load_from_memory(&padded).is_ok());
        }
    }

    #[test]
    fn comment_padding_splits_large_deficits_exactly() {
        let jpeg = encode_jpeg(&portrait_like(16, 16), 80, 200).unwrap();
        // One byte past a full segment would leave a 1-byte tail.
        let deficit = MAX_COMMENT_PAYLOAD + COMMENT_OVERHEAD + 1;
        let padded = pad_with_comments(jpeg.clone(), jpeg.len() + deficit);
        assert_eq!(padded.len(), jpeg.len() + deficit);
        assert!(image::load_from_memory(&padded).is_ok());
    }

    #[test]
    fn narrow_window_never_passes_the_ceiling() {
        let canvas = portrait_like(276, 354);
        let len = encode_jpeg(&canvas, 95, 200).unwrap().len();
        for (min, max) in [(len + 1, len + 2), (len + 2, len + 3), (len + 3, len + 4)] {
            let t = target(min, max);
            let out = encode_within_budget(
                &canvas,
                &t,
                SearchStrategy::Descending,
                PaddingStrategy::CommentSegment,
            )
            .unwrap();
            assert!(out.bytes.len() >= t.min_bytes, "window {min}..={max}");
            assert!(out.bytes.len() <= t.max_bytes, "window {min}..={max}");
            assert!(out.budget_met());
        }
    }

    #[test]
    fn zero_padding_is_exact() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xD9];
        let padded = pad_with_zeros(jpeg, 100);
        assert_eq!(padded.len(), 100);
        assert!(padded[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn floor_is_met_with_default_target() {
        let canvas = portrait_like(276, 354);
        let t = TargetSpec::default();
        for padding in [PaddingStrategy::CommentSegment, PaddingStrategy::TrailingZeros] {
            let out =
                encode_within_budget(&canvas, &t, SearchStrategy::Descending, padding).unwrap();
            assert!(out.bytes.len() >= t.min_bytes, "{padding:?}");
            assert!(out.bytes.len() <= t.max_bytes, "{padding:?}");
            assert_eq!(out.bytes.len(), out.compressed_len + out.padding);
        }
    }

    #[test]
    fn preview_is_blurred_and_smaller() {
        let canvas = noisy(276, 354);
        let jpeg = encode_jpeg(&canvas, 95, 200).unwrap();
        let preview = make_preview(&jpeg, 200).unwrap();
        assert!(preview.len() < jpeg.len());
        let decoded = image::load_from_memory(&preview).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (276, 354));
    }

    #[test]
    fn default_ladder_is_descending() {
        let levels = QualityLadder::default().levels();
        assert!(levels.windows(2).all(|w| w[0] > w[1]));
    }
}
