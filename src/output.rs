//! Result types returned by the pipeline.

use crate::error::PipelineWarning;
use crate::pipeline::caption::FontSource;
use serde::{Deserialize, Serialize};

/// A finished document photograph.
///
/// Serialises without the raw bytes (use `--json` in the CLI to inspect a
/// run); the bytes are what gets written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducedPhoto {
    /// Identifier of this invocation; also used in file names it creates.
    pub request_id: String,

    /// The encoded JPEG, padding included.
    #[serde(skip)]
    pub bytes: Vec<u8>,

    /// `bytes.len()`.
    pub byte_len: usize,

    /// Canvas width in pixels.
    pub width: u32,

    /// Canvas height in pixels.
    pub height: u32,

    /// JPEG quality of the accepted encoding.
    pub quality: u8,

    /// Size of the compressed stream before padding.
    pub compressed_len: usize,

    /// Bytes added to reach the floor.
    pub padding: usize,

    /// Number of encodes performed during the quality search.
    pub attempts: usize,

    /// What was drawn into the footer, and where.
    pub caption: CaptionLayout,

    /// Non-fatal conditions raised during this run.
    pub warnings: Vec<PipelineWarning>,

    /// Timing and source-image details.
    pub stats: PipelineStats,
}

impl ProducedPhoto {
    /// `false` when the byte ceiling could not be met at any quality level.
    pub fn budget_met(&self) -> bool {
        !self
            .warnings
            .iter()
            .any(|w| matches!(w, PipelineWarning::EncodingBudgetUnmet { .. }))
    }

    /// `true` when no warning of any kind was raised.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Final caption text and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionLayout {
    /// Uppercased, whitespace-normalised applicant name as drawn.
    pub name: String,
    /// Date as drawn, `DD-MM-YYYY`.
    pub date: String,
    /// Font size (px) after shrink-to-fit.
    pub font_size: u32,
    /// Top-left of the name line.
    pub name_origin: (i32, i32),
    /// Top-left of the date line.
    pub date_origin: (i32, i32),
    /// Measured width of the name at `font_size`.
    pub name_width: u32,
    /// Measured width of the date at `font_size`.
    pub date_width: u32,
    /// Which face rendered the caption.
    pub font_source: FontSource,
}

/// Per-run statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Decoded source width.
    pub source_width: u32,
    /// Decoded source height.
    pub source_height: u32,
    pub decode_ms: u64,
    pub segment_ms: u64,
    pub compose_ms: u64,
    pub caption_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}
