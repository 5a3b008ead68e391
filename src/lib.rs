//! # docphoto
//!
//! Turn an ordinary portrait into an ID-document photograph: white
//! background, fixed print size, a caption with the applicant's name and the
//! date, and a JPEG whose size falls inside a required byte window.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload bytes
//!  │
//!  ├─ 1. Decode   JPEG / PNG / WebP → RGB, every input error raised here
//!  ├─ 2. Segment  mask the subject, blend the backdrop to pure white
//!  ├─ 3. Compose  scale to 276 px wide, centre in the 283 px head region
//!  ├─ 4. Caption  NAME and DD-MM-YYYY in the 71 px footer, shrink to fit
//!  └─ 5. Encode   walk the quality ladder under 49 KiB, pad up to 35 KiB
//! ```
//!
//! (Pixel sizes are for the default 3.5 × 4.5 cm target at 200 dpi.)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docphoto::{PhotoConfig, PhotoPipeline};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = PhotoPipeline::new(PhotoConfig::default())?;
//!     let upload = std::fs::read("portrait.jpg")?;
//!     let photo = pipeline.produce(&upload, "A. Kumar")?;
//!     std::fs::write("kumar.jpg", &photo.bytes)?;
//!     eprintln!("{} bytes at quality {}", photo.byte_len, photo.quality);
//!     for w in &photo.warnings {
//!         eprintln!("warning: {w}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Non-fatal conditions (the ceiling could not be met, the font fell back,
//! the caption overflowed) never fail the call. They are listed in
//! [`ProducedPhoto::warnings`] and sent to
//! [`PipelineProgressCallback::on_warning`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docphoto` binary (clap + indicatif + anyhow + tracing-subscriber) |
//! | `onnx`  | off     | U²-Net background removal via ONNX Runtime, models downloaded on demand |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docphoto = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod produce;
pub mod progress;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{produce_stream, JobResult, PhotoJob};
pub use config::{
    FontChoice, PaddingStrategy, PhotoConfig, PhotoConfigBuilder, PixelGeometry, QualityLadder,
    SearchStrategy, SegmenterChoice, TargetSpec,
};
pub use error::{DocPhotoError, PipelineWarning};
pub use output::{CaptionLayout, PipelineStats, ProducedPhoto};
pub use pipeline::caption::{CaptionText, FontSource};
pub use pipeline::encode::{make_preview, EncodedPhoto};
#[cfg(feature = "onnx")]
pub use pipeline::onnx::OnnxSegmenter;
pub use pipeline::segment::{BorderKeySegmenter, Segmenter};
pub use produce::{produce_document_photo, PhotoPipeline};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
pub use session::{Reply, Session, SessionInput, SessionState};
