//! # segmodel-auto
//!
//! Auto-download and cache U²-Net-family ONNX segmentation models at
//! runtime, so that users of the `onnx` backend never have to fetch a model
//! by hand.
//!
//! ## How it works
//!
//! On first call to [`ensure_model`]:
//!
//! 1. Checks `~/.cache/docphoto/models/` for `<name>.onnx`.
//! 2. If absent, downloads it from the
//!    [rembg model release](https://github.com/danielgatis/rembg/releases).
//! 3. Writes it to a temporary file in the cache dir, then renames it into
//!    place, so a crashed download never leaves a truncated model behind.
//!
//! Subsequent calls skip the network entirely.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use segmodel_auto::{ensure_model, ensure_model_silent};
//!
//! // Option A: one-shot, no progress
//! let path = ensure_model_silent("u2netp").expect("model unavailable");
//!
//! // Option B: with progress
//! let path = ensure_model("u2net", Some(&|downloaded, total| {
//!     if let Some(t) = total {
//!         eprint!("\rDownloading model: {}/{} bytes", downloaded, t);
//!     }
//! })).expect("download failed");
//! ```
//!
//! ## Models
//!
//! | Name              | Size    | Notes                          |
//! |-------------------|---------|--------------------------------|
//! | `u2net`           | ~176 MB | general purpose, best quality  |
//! | `u2netp`          | ~4.7 MB | lightweight                    |
//! | `u2net_human_seg` | ~176 MB | trained on people              |
//! | `silueta`         | ~43 MB  | pruned `u2net`                 |
//!
//! ## Environment variable overrides
//!
//! - `DOCPHOTO_MODEL_PATH` — path to an existing `.onnx` file; skips download.
//! - `DOCPHOTO_MODEL_CACHE_DIR` — override the default cache directory.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Release tag the models are downloaded from.
pub const MODEL_RELEASE: &str = "v0.0.0";

/// Model used when the caller does not name one.
pub const DEFAULT_MODEL: &str = "u2net";

/// Square input side length shared by every supported model.
pub const MODEL_INPUT_SIZE: u32 = 320;

/// GitHub release base URL.
const BASE_URL: &str = "https://github.com/danielgatis/rembg/releases/download";

/// Env var naming an explicit model file.
pub const MODEL_PATH_ENV: &str = "DOCPHOTO_MODEL_PATH";

/// Env var overriding the cache directory.
pub const CACHE_DIR_ENV: &str = "DOCPHOTO_MODEL_CACHE_DIR";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by segmodel-auto operations.
#[derive(Error, Debug)]
pub enum SegModelError {
    /// The requested model name is not in the registry.
    #[error("Unknown segmentation model '{name}' (known: {known})")]
    UnknownModel { name: String, known: String },

    /// Could not create or write to the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download failed.
    #[error("Download failed: {0}")]
    Download(String),
}

// ── Model registry ───────────────────────────────────────────────────────────

/// A downloadable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    /// Registry name, e.g. `u2netp`.
    pub name: &'static str,
    /// Asset filename in the release.
    pub file_name: &'static str,
    /// Rough download size, for progress bars without a Content-Length.
    pub approx_bytes: u64,
}

/// Every model [`ensure_model`] can fetch.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "u2net",
        file_name: "u2net.onnx",
        approx_bytes: 176 * 1024 * 1024,
    },
    ModelInfo {
        name: "u2netp",
        file_name: "u2netp.onnx",
        approx_bytes: 5 * 1024 * 1024,
    },
    ModelInfo {
        name: "u2net_human_seg",
        file_name: "u2net_human_seg.onnx",
        approx_bytes: 176 * 1024 * 1024,
    },
    ModelInfo {
        name: "silueta",
        file_name: "silueta.onnx",
        approx_bytes: 43 * 1024 * 1024,
    },
];

/// Look up a model by name.
pub fn model_info(name: &str) -> Result<&'static ModelInfo, SegModelError> {
    MODELS
        .iter()
        .find(|m| m.name == name)
        .ok_or_else(|| SegModelError::UnknownModel {
            name: name.to_string(),
            known: MODELS
                .iter()
                .map(|m| m.name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the model cache directory.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/docphoto/models/`
/// - **Linux**: `~/.cache/docphoto/models/`
/// - **Windows**: `%LOCALAPPDATA%\docphoto\models\`
///
/// Override by setting `DOCPHOTO_MODEL_CACHE_DIR`.
pub fn model_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var(CACHE_DIR_ENV) {
        return PathBuf::from(override_dir);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("docphoto").join("models")
}

// ── Thread-safe per-model path cache ─────────────────────────────────────────

static RESOLVED: OnceLock<Mutex<HashMap<String, PathBuf>>> = OnceLock::new();

fn resolved() -> &'static Mutex<HashMap<String, PathBuf>> {
    RESOLVED.get_or_init(|| Mutex::new(HashMap::new()))
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Returns the on-disk path of `name`, or `None` if it is not cached.
///
/// `DOCPHOTO_MODEL_PATH` wins when it points to an existing file.
pub fn cached_model_path(name: &str) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(MODEL_PATH_ENV) {
        let pb = PathBuf::from(p);
        if pb.is_file() {
            return Some(pb);
        }
    }
    let info = model_info(name).ok()?;
    let p = model_cache_dir().join(info.file_name);
    p.is_file().then_some(p)
}

/// Ensures model `name` is present in the local cache and returns its path.
///
/// `on_progress` receives `(bytes_downloaded, total_size_option)` during
/// the download. Pass `None` to suppress progress callbacks.
///
/// # Thread safety
///
/// Safe to call from multiple threads; once a path is resolved it is reused
/// for the rest of the process.
pub fn ensure_model(
    name: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<PathBuf, SegModelError> {
    if let Some(path) = resolved()
        .lock()
        .ok()
        .and_then(|m| m.get(name).cloned())
    {
        return Ok(path);
    }

    let path = resolve_or_download(name, on_progress)?;

    if let Ok(mut m) = resolved().lock() {
        m.insert(name.to_string(), path.clone());
    }
    Ok(path)
}

/// [`ensure_model`] without progress output.
pub fn ensure_model_silent(name: &str) -> Result<PathBuf, SegModelError> {
    ensure_model(name, None)
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn resolve_or_download(
    name: &str,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<PathBuf, SegModelError> {
    // 1. Environment variable override.
    if let Ok(env_path) = std::env::var(MODEL_PATH_ENV) {
        let p = PathBuf::from(env_path);
        if p.is_file() {
            return Ok(p);
        }
        eprintln!(
            "segmodel-auto: {MODEL_PATH_ENV} '{}' not found; downloading …",
            p.display()
        );
    }

    let info = model_info(name)?;
    let cache_dir = model_cache_dir();
    let model_path = cache_dir.join(info.file_name);

    // 2. Already cached on disk.
    if model_path.is_file() {
        return Ok(model_path);
    }

    // 3. Download into a temp file, then rename into place.
    let url = format!("{BASE_URL}/{MODEL_RELEASE}/{}", info.file_name);
    std::fs::create_dir_all(&cache_dir).map_err(SegModelError::CacheDir)?;

    let bytes = download_bytes(&url, info.approx_bytes, on_progress)?;
    write_atomic(&cache_dir, &model_path, &bytes)?;

    Ok(model_path)
}

/// Streams a URL into a `Vec<u8>`, calling `on_progress` every 64 KiB.
fn download_bytes(
    url: &str,
    approx_bytes: u64,
    on_progress: Option<&dyn Fn(u64, Option<u64>)>,
) -> Result<Vec<u8>, SegModelError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("segmodel-auto/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| SegModelError::Download(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .map_err(|e| SegModelError::Download(format!("GET {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(SegModelError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let total = response.content_length();
    let mut buf = Vec::with_capacity(total.unwrap_or(approx_bytes) as usize);

    let mut stream = response;
    let mut chunk = vec![0u8; 64 * 1024]; // 64 KiB
    let mut downloaded: u64 = 0;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(SegModelError::Download(format!("Read error: {e}")));
            }
        }
    }

    if let Some(t) = total {
        if downloaded != t {
            return Err(SegModelError::Download(format!(
                "truncated download: {downloaded} of {t} bytes"
            )));
        }
    }

    Ok(buf)
}

fn write_atomic(dir: &Path, dest: &Path, bytes: &[u8]) -> Result<(), SegModelError> {
    let tmp = dir.join(format!(
        ".{}.part-{}",
        dest.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        std::process::id()
    ));
    let mut file = std::fs::File::create(&tmp).map_err(SegModelError::CacheDir)?;
    file.write_all(bytes).map_err(SegModelError::CacheDir)?;
    file.sync_all().map_err(SegModelError::CacheDir)?;
    drop(file);
    std::fs::rename(&tmp, dest).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        SegModelError::CacheDir(e)
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
