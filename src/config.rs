//! Configuration types for document-photo production.
//!
//! All pipeline behaviour is controlled through [`PhotoConfig`], built via its
//! [`PhotoConfigBuilder`] and validated once in [`PhotoConfigBuilder::build`].
//! The physical requirements of the document live in [`TargetSpec`]; the
//! pixel sizes the stages actually work with are derived from it as
//! [`PixelGeometry`].
//!
//! Nothing here is read from the environment. The CLI maps its flags (and
//! their `DOCPHOTO_*` env fallbacks) onto the builder.

use crate::error::DocPhotoError;
use crate::progress::ProgressCallback;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Centimetres per inch; physical sizes are given in cm, resolution in dpi.
pub const CM_PER_INCH: f64 = 2.54;

/// Convert a physical length to whole pixels at `dpi`.
///
/// Rounds to nearest: 3.5 cm @ 200 dpi → 275.59 → 276 px.
pub fn cm_to_px(cm: f64, dpi: u32) -> u32 {
    (cm * dpi as f64 / CM_PER_INCH).round() as u32
}

// ── Target specification ─────────────────────────────────────────────────

/// Physical and file-size requirements of the finished photograph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Print width in centimetres. Default: 3.5.
    pub width_cm: f64,
    /// Print height in centimetres. Default: 4.5.
    pub height_cm: f64,
    /// Height of the head region (top of the canvas) in centimetres. Default: 3.6.
    ///
    /// The remainder down to `height_cm` is the caption footer.
    pub head_cm: f64,
    /// Resolution in dots per inch. Default: 200.
    pub dpi: u32,
    /// Smallest acceptable output size in bytes, inclusive. Default: 35 KiB.
    pub min_bytes: usize,
    /// Largest acceptable output size in bytes, inclusive. Default: 49 KiB.
    pub max_bytes: usize,
    /// JPEG quality levels tried by the encoder.
    pub quality: QualityLadder,
}

impl Default for TargetSpec {
    fn default() -> Self {
        Self {
            width_cm: 3.5,
            height_cm: 4.5,
            head_cm: 3.6,
            dpi: 200,
            min_bytes: 35 * 1024,
            max_bytes: 49 * 1024,
            quality: QualityLadder::default(),
        }
    }
}

impl TargetSpec {
    /// Pixel sizes derived from the physical dimensions.
    pub fn geometry(&self) -> PixelGeometry {
        PixelGeometry {
            width_px: cm_to_px(self.width_cm, self.dpi),
            height_px: cm_to_px(self.height_cm, self.dpi),
            head_px: cm_to_px(self.head_cm, self.dpi),
        }
    }

    /// Check the invariants every stage relies on.
    pub fn validate(&self) -> Result<(), DocPhotoError> {
        let lengths = [
            ("width_cm", self.width_cm),
            ("height_cm", self.height_cm),
            ("head_cm", self.head_cm),
        ];
        for (name, v) in lengths {
            if !(v.is_finite() && v > 0.0) {
                return Err(DocPhotoError::InvalidConfig(format!(
                    "{name} must be a positive length, got {v}"
                )));
            }
        }
        if self.head_cm >= self.height_cm {
            return Err(DocPhotoError::InvalidConfig(format!(
                "head region ({} cm) must be shorter than the photo ({} cm)",
                self.head_cm, self.height_cm
            )));
        }
        if self.dpi == 0 {
            return Err(DocPhotoError::InvalidConfig("dpi must be ≥ 1".into()));
        }
        if self.min_bytes >= self.max_bytes {
            return Err(DocPhotoError::InvalidConfig(format!(
                "byte window is empty: min {} ≥ max {}",
                self.min_bytes, self.max_bytes
            )));
        }
        self.quality.validate()?;

        let g = self.geometry();
        if g.width_px == 0 || g.head_px == 0 || g.footer_px() == 0 {
            return Err(DocPhotoError::InvalidConfig(format!(
                "derived canvas {}x{} (head {}) has an empty region",
                g.width_px, g.height_px, g.head_px
            )));
        }
        // JPEG frame headers store dimensions as u16.
        if g.width_px > u16::MAX as u32 || g.height_px > u16::MAX as u32 {
            return Err(DocPhotoError::InvalidConfig(format!(
                "derived canvas {}x{} exceeds the JPEG limit of 65535 px",
                g.width_px, g.height_px
            )));
        }
        Ok(())
    }
}

/// Descending sequence of JPEG quality levels: `start, start-step, …, ≥ stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityLadder {
    pub start: u8,
    pub stop: u8,
    pub step: u8,
}

impl Default for QualityLadder {
    fn default() -> Self {
        Self {
            start: 95,
            stop: 5,
            step: 5,
        }
    }
}

impl QualityLadder {
    /// Expand into the concrete levels, highest first.
    pub fn levels(&self) -> Vec<u8> {
        let step = self.step.max(1) as usize;
        (self.stop..=self.start).rev().step_by(step).collect()
    }

    fn validate(&self) -> Result<(), DocPhotoError> {
        if self.stop == 0 || self.start > 100 || self.stop > self.start {
            return Err(DocPhotoError::InvalidConfig(format!(
                "quality ladder must satisfy 1 ≤ stop ≤ start ≤ 100, got {}..{}",
                self.start, self.stop
            )));
        }
        if self.step == 0 {
            return Err(DocPhotoError::InvalidConfig(
                "quality step must be ≥ 1".into(),
            ));
        }
        Ok(())
    }
}

/// Pixel dimensions of the canvas, derived from a [`TargetSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelGeometry {
    pub width_px: u32,
    pub height_px: u32,
    pub head_px: u32,
}

impl PixelGeometry {
    /// Height of the caption band below the head region.
    pub fn footer_px(&self) -> u32 {
        self.height_px.saturating_sub(self.head_px)
    }
}

// ── Strategy enums ───────────────────────────────────────────────────────

/// How the encoder walks the quality ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchStrategy {
    /// Try levels highest first and keep the first that fits. (default)
    #[default]
    Descending,
    /// Bisect the ladder for the highest level that fits. Same result as
    /// `Descending` whenever size falls monotonically with quality, in
    /// O(log n) encodes.
    Binary,
}

/// How an undersized encoding is grown to the byte floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaddingStrategy {
    /// Insert JPEG comment (COM) segments after the JFIF APP0 header, so the
    /// file keeps its JFIF layout and density. A deficit too small for a
    /// segment (under 4 bytes) is appended after EOI. (default)
    #[default]
    CommentSegment,
    /// Append NUL bytes after the EOI marker. Byte-compatible with the
    /// legacy scheme; relies on decoders ignoring trailing data.
    TrailingZeros,
}

/// Which face renders the caption.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FontChoice {
    /// Search well-known locations for a bold serif face. (default)
    #[default]
    System,
    /// Load this TrueType/OpenType file.
    Path(PathBuf),
    /// Always use the embedded DejaVu Serif Bold face.
    Builtin,
}

/// Which backend removes the original background.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SegmenterChoice {
    /// Pure-Rust backdrop keying from the image border. (default)
    #[default]
    BorderKey,
    /// ONNX U²-Net-family model loaded from a file (feature `onnx`).
    OnnxFile(PathBuf),
    /// ONNX model by name (`u2net`, `u2netp`, `u2net_human_seg`, `silueta`),
    /// downloaded and cached on first use (feature `onnx`).
    OnnxAuto(String),
}

// ── PhotoConfig ──────────────────────────────────────────────────────────

/// Configuration for a [`crate::produce::PhotoPipeline`].
///
/// Built via [`PhotoConfig::builder()`] or using [`PhotoConfig::default()`].
///
/// # Example
/// ```rust
/// use docphoto::{PhotoConfig, SearchStrategy};
///
/// let config = PhotoConfig::builder()
///     .search(SearchStrategy::Binary)
///     .byte_window(30 * 1024, 45 * 1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.target.geometry().width_px, 276);
/// ```
#[derive(Clone)]
pub struct PhotoConfig {
    /// Physical size, resolution and byte window of the output.
    pub target: TargetSpec,

    /// Quality search strategy. Default: [`SearchStrategy::Descending`].
    pub search: SearchStrategy,

    /// Padding strategy for undersized encodings. Default: [`PaddingStrategy::CommentSegment`].
    pub padding: PaddingStrategy,

    /// Caption font. Default: [`FontChoice::System`].
    pub font: FontChoice,

    /// Pin the caption date. `None` uses the local date at render time.
    pub caption_date: Option<NaiveDate>,

    /// Background segmentation backend. Default: [`SegmenterChoice::BorderKey`].
    pub segmenter: SegmenterChoice,

    /// Minimum share of foreground pixels for a mask to count as usable.
    /// Default: 0.005 (0.5 %).
    pub min_foreground_coverage: f32,

    /// Optional stage-progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            target: TargetSpec::default(),
            search: SearchStrategy::default(),
            padding: PaddingStrategy::default(),
            font: FontChoice::default(),
            caption_date: None,
            segmenter: SegmenterChoice::default(),
            min_foreground_coverage: DEFAULT_MIN_COVERAGE,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PhotoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoConfig")
            .field("target", &self.target)
            .field("search", &self.search)
            .field("padding", &self.padding)
            .field("font", &self.font)
            .field("caption_date", &self.caption_date)
            .field("segmenter", &self.segmenter)
            .field("min_foreground_coverage", &self.min_foreground_coverage)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PhotoConfig {
    /// Create a new builder for `PhotoConfig`.
    pub fn builder() -> PhotoConfigBuilder {
        PhotoConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check every invariant. [`PhotoConfigBuilder::build`] calls this; it is
    /// public for configs assembled field by field.
    pub fn validate(&self) -> Result<(), DocPhotoError> {
        self.target.validate()?;
        if !(0.0..1.0).contains(&self.min_foreground_coverage) {
            return Err(DocPhotoError::InvalidConfig(format!(
                "min_foreground_coverage must be in [0, 1), got {}",
                self.min_foreground_coverage
            )));
        }
        if let FontChoice::Path(ref p) = self.font {
            if p.as_os_str().is_empty() {
                return Err(DocPhotoError::InvalidConfig("font path is empty".into()));
            }
        }
        Ok(())
    }
}

const DEFAULT_MIN_COVERAGE: f32 = 0.005;

/// Builder for [`PhotoConfig`].
pub struct PhotoConfigBuilder {
    config: PhotoConfig,
}

impl fmt::Debug for PhotoConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PhotoConfigBuilder")
            .field(&self.config)
            .finish()
    }
}

impl PhotoConfigBuilder {
    pub fn target(mut self, target: TargetSpec) -> Self {
        self.config.target = target;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.target.dpi = dpi;
        self
    }

    pub fn byte_window(mut self, min_bytes: usize, max_bytes: usize) -> Self {
        self.config.target.min_bytes = min_bytes;
        self.config.target.max_bytes = max_bytes;
        self
    }

    pub fn quality_ladder(mut self, start: u8, stop: u8, step: u8) -> Self {
        self.config.target.quality = QualityLadder { start, stop, step };
        self
    }

    pub fn search(mut self, strategy: SearchStrategy) -> Self {
        self.config.search = strategy;
        self
    }

    pub fn padding(mut self, strategy: PaddingStrategy) -> Self {
        self.config.padding = strategy;
        self
    }

    pub fn font(mut self, font: FontChoice) -> Self {
        self.config.font = font;
        self
    }

    pub fn caption_date(mut self, date: NaiveDate) -> Self {
        self.config.caption_date = Some(date);
        self
    }

    pub fn segmenter(mut self, choice: SegmenterChoice) -> Self {
        self.config.segmenter = choice;
        self
    }

    pub fn min_foreground_coverage(mut self, share: f32) -> Self {
        self.config.min_foreground_coverage = share;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PhotoConfig, DocPhotoError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
