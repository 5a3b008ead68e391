//! Photograph production entry points.
//!
//! [`PhotoPipeline`] owns everything that is expensive to set up and safe to
//! share: the validated configuration, the segmentation backend and the
//! caption font. Build it once, wrap it in an `Arc`, and call
//! [`PhotoPipeline::produce`] from as many threads as needed. Invocations
//! share no mutable state and every file they create carries a fresh
//! identifier.
//!
//! [`produce_document_photo`] is the one-shot convenience wrapper.

use crate::config::{PhotoConfig, PixelGeometry, SegmenterChoice};
use crate::error::{DocPhotoError, PipelineWarning};
use crate::output::{PipelineStats, ProducedPhoto};
use crate::pipeline::caption::{self, CaptionText, ResolvedFont};
use crate::pipeline::segment::{BorderKeySegmenter, Segmenter};
use crate::pipeline::{compose, encode, input};
use crate::progress::Stage;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of files written by [`PhotoPipeline::produce_to_dir`].
pub const OUTPUT_FILE_PREFIX: &str = "Photograph";

/// A configured, shareable document-photo pipeline.
pub struct PhotoPipeline {
    config: PhotoConfig,
    geometry: PixelGeometry,
    segmenter: Arc<dyn Segmenter>,
    font: Arc<ResolvedFont>,
}

impl std::fmt::Debug for PhotoPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoPipeline")
            .field("config", &self.config)
            .field("geometry", &self.geometry)
            .field("segmenter", &self.segmenter.name())
            .field("font", &self.font.source)
            .finish()
    }
}

impl PhotoPipeline {
    /// Validate `config`, start the segmentation backend and resolve the
    /// caption font.
    ///
    /// # Errors
    /// [`DocPhotoError::InvalidConfig`] or
    /// [`DocPhotoError::SegmenterUnavailable`].
    pub fn new(config: PhotoConfig) -> Result<Self, DocPhotoError> {
        config.validate()?;
        let segmenter = build_segmenter(&config.segmenter)?;
        Ok(Self::assemble(config, segmenter))
    }

    /// Like [`PhotoPipeline::new`] but with a caller-supplied segmenter;
    /// `config.segmenter` is ignored.
    pub fn with_segmenter(
        config: PhotoConfig,
        segmenter: Arc<dyn Segmenter>,
    ) -> Result<Self, DocPhotoError> {
        config.validate()?;
        Ok(Self::assemble(config, segmenter))
    }

    fn assemble(config: PhotoConfig, segmenter: Arc<dyn Segmenter>) -> Self {
        let geometry = config.target.geometry();
        let font = Arc::new(caption::resolve_font(&config.font));
        info!(
            "Pipeline ready: {}x{} px (head {}), segmenter {}, font {:?}",
            geometry.width_px,
            geometry.height_px,
            geometry.head_px,
            segmenter.name(),
            font.source
        );
        Self {
            config,
            geometry,
            segmenter,
            font,
        }
    }

    pub fn config(&self) -> &PhotoConfig {
        &self.config
    }

    pub fn geometry(&self) -> PixelGeometry {
        self.geometry
    }

    pub fn segmenter_name(&self) -> &str {
        self.segmenter.name()
    }

    /// Turn an uploaded portrait into a finished photograph.
    ///
    /// # Errors
    /// Input errors (empty, undecodable, empty name) are raised before any
    /// stage runs. [`DocPhotoError::SegmentationFailure`] when no subject is
    /// found. Non-fatal shortfalls are returned in
    /// [`ProducedPhoto::warnings`] instead.
    pub fn produce(&self, source: &[u8], name: &str) -> Result<ProducedPhoto, DocPhotoError> {
        let total_start = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        info!(
            "[{}] Producing photograph ({} bytes upload)",
            request_id,
            source.len()
        );

        let date = self
            .config
            .caption_date
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let text = CaptionText::new(name, date)?;

        // ── Step 1: Decode ───────────────────────────────────────────────
        let (src, decode_ms) = self.stage(Stage::Decode, || input::decode_source(source))?;

        // ── Step 2: Background ───────────────────────────────────────────
        let (normalized, segment_ms) = self.stage(Stage::Segment, || {
            crate::pipeline::segment::normalize_background(
                &src.image,
                self.segmenter.as_ref(),
                self.config.min_foreground_coverage,
            )
        })?;

        // ── Step 3: Geometry ─────────────────────────────────────────────
        let (mut canvas, compose_ms) = self.stage(Stage::Compose, || {
            Ok(compose::compose(&normalized, &self.geometry))
        })?;

        // ── Step 4: Caption ──────────────────────────────────────────────
        let ((layout, overflow), caption_ms) = self.stage(Stage::Caption, || {
            Ok(caption::render_caption(
                &mut canvas,
                &text,
                &self.font,
                &self.geometry,
            ))
        })?;

        // ── Step 5: Encode ───────────────────────────────────────────────
        let (encoded, encode_ms) = self.stage(Stage::Encode, || {
            encode::encode_within_budget(
                &canvas,
                &self.config.target,
                self.config.search,
                self.config.padding,
            )
        })?;

        let warnings: Vec<PipelineWarning> = self
            .font
            .fallback
            .iter()
            .cloned()
            .chain(overflow)
            .chain(encoded.shortfall.clone())
            .collect();
        for w in &warnings {
            warn!("[{}] {}", request_id, w);
            if let Some(ref cb) = self.config.progress_callback {
                cb.on_warning(w);
            }
        }

        let stats = PipelineStats {
            source_width: src.width(),
            source_height: src.height(),
            decode_ms,
            segment_ms,
            compose_ms,
            caption_ms,
            encode_ms,
            total_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "[{}] Done: {} bytes at q{} (+{} padding), {} warning(s), {}ms",
            request_id,
            encoded.bytes.len(),
            encoded.quality,
            encoded.padding,
            warnings.len(),
            stats.total_ms
        );

        Ok(ProducedPhoto {
            request_id,
            byte_len: encoded.bytes.len(),
            bytes: encoded.bytes,
            width: canvas.width(),
            height: canvas.height(),
            quality: encoded.quality,
            compressed_len: encoded.compressed_len,
            padding: encoded.padding,
            attempts: encoded.attempts,
            caption: layout,
            warnings,
            stats,
        })
    }

    /// Produce a photograph and write it to `path`.
    ///
    /// Uses atomic write (temp file in the same directory + rename), so on
    /// any error nothing is left at `path`.
    pub fn produce_to_file(
        &self,
        source: &[u8],
        name: &str,
        path: &Path,
    ) -> Result<ProducedPhoto, DocPhotoError> {
        let photo = self.produce(source, name)?;
        write_atomic(path, &photo.bytes)?;
        debug!("[{}] Wrote {}", photo.request_id, path.display());
        Ok(photo)
    }

    /// Produce a photograph into `dir` as `Photograph-<request id>.jpg`.
    pub fn produce_to_dir(
        &self,
        source: &[u8],
        name: &str,
        dir: &Path,
    ) -> Result<(PathBuf, ProducedPhoto), DocPhotoError> {
        let photo = self.produce(source, name)?;
        let path = dir.join(format!("{OUTPUT_FILE_PREFIX}-{}.jpg", photo.request_id));
        write_atomic(&path, &photo.bytes)?;
        Ok((path, photo))
    }

    /// [`PhotoPipeline::produce`] on the blocking thread pool.
    pub async fn produce_async(
        self: Arc<Self>,
        source: Vec<u8>,
        name: String,
    ) -> Result<ProducedPhoto, DocPhotoError> {
        tokio::task::spawn_blocking(move || self.produce(&source, &name))
            .await
            .map_err(|e| DocPhotoError::Internal(format!("spawn_blocking panicked: {e}")))?
    }

    /// Run one stage with timing, logging and progress events.
    fn stage<T>(
        &self,
        stage: Stage,
        run: impl FnOnce() -> Result<T, DocPhotoError>,
    ) -> Result<(T, u64), DocPhotoError> {
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_stage_start(stage);
        }
        let start = Instant::now();
        match run() {
            Ok(value) => {
                let ms = start.elapsed().as_millis() as u64;
                debug!("Stage {} done in {}ms", stage, ms);
                if let Some(cb) = cb {
                    cb.on_stage_complete(stage, ms);
                }
                Ok((value, ms))
            }
            Err(e) => {
                debug!("Stage {} failed: {}", stage, e);
                if let Some(cb) = cb {
                    cb.on_stage_error(stage, &e);
                }
                Err(e)
            }
        }
    }
}

/// Build a pipeline from `config` and produce a single photograph.
///
/// Sets up the segmenter and font on every call; keep a [`PhotoPipeline`]
/// around when producing more than one.
pub fn produce_document_photo(
    source: &[u8],
    name: &str,
    config: &PhotoConfig,
) -> Result<ProducedPhoto, DocPhotoError> {
    PhotoPipeline::new(config.clone())?.produce(source, name)
}

fn build_segmenter(choice: &SegmenterChoice) -> Result<Arc<dyn Segmenter>, DocPhotoError> {
    match choice {
        SegmenterChoice::BorderKey => Ok(Arc::new(BorderKeySegmenter::new())),
        #[cfg(feature = "onnx")]
        SegmenterChoice::OnnxFile(path) => Ok(Arc::new(
            crate::pipeline::onnx::OnnxSegmenter::from_file(path)?,
        )),
        #[cfg(feature = "onnx")]
        SegmenterChoice::OnnxAuto(model) => Ok(Arc::new(
            crate::pipeline::onnx::OnnxSegmenter::from_model(model, None)?,
        )),
        #[cfg(not(feature = "onnx"))]
        SegmenterChoice::OnnxFile(_) | SegmenterChoice::OnnxAuto(_) => {
            Err(DocPhotoError::SegmenterUnavailable {
                detail: "built without the `onnx` feature".to_string(),
            })
        }
    }
}

/// Write `bytes` to `path` via a temp file in the same directory.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DocPhotoError> {
    let write_err = |e: std::io::Error| DocPhotoError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
