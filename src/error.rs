//! Error types for the docphoto library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`DocPhotoError`] — **Fatal**: the photograph cannot be produced at all
//!   (unreadable upload, no subject found, bad configuration). Returned as
//!   `Err(DocPhotoError)` from [`crate::produce::PhotoPipeline::produce`] and
//!   friends. No output file is written when one of these is returned.
//!
//! * [`PipelineWarning`] — **Non-fatal**: the photograph was produced, but
//!   something fell short (the byte ceiling could not be met, the requested
//!   font was missing, the name does not fit even at the smallest size).
//!   Stored in [`crate::output::ProducedPhoto::warnings`] so callers can flag
//!   the result instead of treating it as a silent success.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the docphoto library.
#[derive(Debug, Error)]
pub enum DocPhotoError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The uploaded image contained no bytes.
    #[error("Source image is empty (0 bytes)")]
    EmptyInput,

    /// The bytes could not be decoded as any supported image format.
    #[error("Source image could not be decoded: {detail}\nSupported formats: JPEG, PNG, WebP.")]
    UnreadableImage { detail: String },

    /// The image decoded but has a zero width or height.
    #[error("Source image has zero width or height")]
    ZeroDimensions,

    /// Input file was not found at the given path.
    #[error("Photo not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The applicant name is empty after trimming.
    #[error("Applicant name is empty")]
    EmptyName,

    // ── Segmentation errors ───────────────────────────────────────────────
    /// Background removal did not yield a usable foreground mask.
    #[error("Background segmentation failed ({segmenter}): {detail}")]
    SegmentationFailure { segmenter: String, detail: String },

    /// The segmentation backend could not be initialised (model missing,
    /// runtime unavailable).
    #[error("Segmentation backend unavailable: {detail}")]
    SegmenterUnavailable { detail: String },

    // ── Encoding errors ───────────────────────────────────────────────────
    /// The JPEG encoder rejected the canvas.
    #[error("JPEG encoding failed at quality {quality}: {detail}")]
    EncodingFailed { quality: u8, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output photograph.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DocPhotoError {
    /// `true` for problems with what the caller handed in (the image or the
    /// name), as opposed to failures inside the pipeline.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            DocPhotoError::EmptyInput
                | DocPhotoError::UnreadableImage { .. }
                | DocPhotoError::ZeroDimensions
                | DocPhotoError::FileNotFound { .. }
                | DocPhotoError::PermissionDenied { .. }
                | DocPhotoError::EmptyName
        )
    }
}

/// A non-fatal condition raised while producing a photograph.
///
/// The photograph is still returned; the warning tells the caller which
/// guarantee was relaxed.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// No quality level in the search ladder produced a file at or below
    /// the byte ceiling; the lowest-quality encoding was kept.
    #[error("No quality level met the {max_bytes}-byte ceiling; kept quality {quality} at {smallest_bytes} bytes")]
    EncodingBudgetUnmet {
        max_bytes: usize,
        smallest_bytes: usize,
        quality: u8,
    },

    /// The requested caption font could not be loaded; the built-in face
    /// was used instead.
    #[error("Caption font unavailable ({requested}): {reason}; using built-in face")]
    FontFallback { requested: String, reason: String },

    /// The caption is wider than the canvas even at the minimum font size.
    #[error("Caption '{text}' is {width_px}px wide at the minimum size (limit {max_width_px}px); it may be clipped")]
    CaptionOverflow {
        text: String,
        width_px: u32,
        max_width_px: u32,
    },
}
