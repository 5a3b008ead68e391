//! Batch production: many independent photographs through one pipeline.
//!
//! [`produce_stream`] fans jobs out over the blocking thread pool with at
//! most `concurrency` in flight and yields each [`JobResult`] as soon as it
//! completes, so results arrive in completion order, not submission order.
//! Match them up by [`JobResult::id`].
//!
//! A failed job never aborts the batch; its error is carried in the result.

use crate::error::DocPhotoError;
use crate::output::ProducedPhoto;
use crate::pipeline::input;
use crate::produce::PhotoPipeline;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{debug, info};

/// One photograph to produce.
#[derive(Debug, Clone)]
pub struct PhotoJob {
    /// Caller-chosen identifier echoed in the result.
    pub id: String,
    /// Raw upload bytes.
    pub source: Vec<u8>,
    /// Applicant name for the caption.
    pub name: String,
}

/// Outcome of one [`PhotoJob`].
#[derive(Debug)]
pub struct JobResult {
    pub id: String,
    pub result: Result<ProducedPhoto, DocPhotoError>,
}

/// A boxed stream of job results.
pub type JobStream = Pin<Box<dyn Stream<Item = JobResult> + Send>>;

/// Produce every job, at most `concurrency` at a time.
pub fn produce_stream(
    pipeline: Arc<PhotoPipeline>,
    jobs: Vec<PhotoJob>,
    concurrency: usize,
) -> JobStream {
    let concurrency = concurrency.max(1);
    info!(
        "Starting batch: {} job(s), concurrency {}",
        jobs.len(),
        concurrency
    );

    let s = stream::iter(jobs.into_iter().map(move |job| {
        let pipeline = Arc::clone(&pipeline);
        async move {
            let PhotoJob { id, source, name } = job;
            debug!("Job {} started", id);
            let result = pipeline.produce_async(source, name).await;
            JobResult { id, result }
        }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}

// ── Manifest ─────────────────────────────────────────────────────────────

/// One line of a batch manifest: a photo on disk and the name to print.
///
/// ```json
/// [
///   { "photo": "uploads/kumar.jpg", "name": "A. Kumar" },
///   { "id": "r-17", "photo": "uploads/devi.png", "name": "S. Devi" }
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Defaults to the photo's file stem.
    #[serde(default)]
    pub id: Option<String>,
    /// Relative paths are resolved against the manifest's directory.
    pub photo: PathBuf,
    pub name: String,
}

/// Parse a JSON manifest.
pub fn parse_manifest(json: &str) -> Result<Vec<ManifestEntry>, DocPhotoError> {
    serde_json::from_str(json)
        .map_err(|e| DocPhotoError::InvalidConfig(format!("batch manifest: {e}")))
}

/// Read a manifest and every photo it names.
///
/// Fails on the first unreadable photo so that a typo in the manifest is
/// reported before any work starts.
pub async fn load_manifest(path: &Path) -> Result<Vec<PhotoJob>, DocPhotoError> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DocPhotoError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => DocPhotoError::InvalidConfig(format!("{}: {e}", path.display())),
        })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let mut jobs = Vec::new();
    for entry in parse_manifest(&json)? {
        let photo = if entry.photo.is_absolute() {
            entry.photo.clone()
        } else {
            base.join(&entry.photo)
        };
        let id = entry.id.clone().unwrap_or_else(|| {
            photo
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("job-{}", jobs.len() + 1))
        });
        jobs.push(PhotoJob {
            id,
            source: input::read_source_async(&photo).await?,
            name: entry.name,
        });
    }
    Ok(jobs)
}
