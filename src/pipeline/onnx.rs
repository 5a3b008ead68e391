//! U²-Net-family background segmentation via ONNX Runtime (feature `onnx`).
//!
//! The model sees a 320x320 RGB tensor, normalised by the image maximum and
//! then by ImageNet statistics, and returns a saliency map whose first
//! channel is the foreground probability. That map is min-max stretched to
//! `[0, 255]` and resized back to the source dimensions.
//!
//! `ort` sessions need `&mut` to run, so the session sits behind a `Mutex`
//! and concurrent invocations take turns on inference while every other
//! stage still runs in parallel.

use crate::error::DocPhotoError;
use crate::pipeline::segment::{AlphaMask, Segmenter};
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// An ONNX saliency model used as a [`Segmenter`].
pub struct OnnxSegmenter {
    session: Mutex<Session>,
    input_size: u32,
    name: String,
}

impl std::fmt::Debug for OnnxSegmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxSegmenter")
            .field("name", &self.name)
            .field("input_size", &self.input_size)
            .finish_non_exhaustive()
    }
}

impl OnnxSegmenter {
    /// Load a model file.
    pub fn from_file(path: &Path) -> Result<Self, DocPhotoError> {
        info!("Loading segmentation model from {}", path.display());
        let unavailable = |e: ort::Error| DocPhotoError::SegmenterUnavailable {
            detail: format!("{}: {e}", path.display()),
        };
        let session = Session::builder()
            .map_err(unavailable)?
            .commit_from_file(path)
            .map_err(unavailable)?;

        let name = path
            .file_stem()
            .map(|s| format!("onnx:{}", s.to_string_lossy()))
            .unwrap_or_else(|| "onnx".to_string());

        Ok(Self {
            session: Mutex::new(session),
            input_size: segmodel_auto::MODEL_INPUT_SIZE,
            name,
        })
    }

    /// Load a model by registry name, downloading it on first use.
    pub fn from_model(
        model: &str,
        on_progress: Option<&dyn Fn(u64, Option<u64>)>,
    ) -> Result<Self, DocPhotoError> {
        let path = segmodel_auto::ensure_model(model, on_progress).map_err(|e| {
            DocPhotoError::SegmenterUnavailable {
                detail: e.to_string(),
            }
        })?;
        Self::from_file(&path)
    }

    fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let side = self.input_size;
        let resized = imageops::resize(image, side, side, FilterType::Lanczos3);
        let max = resized
            .as_raw()
            .iter()
            .copied()
            .max()
            .map(|m| (m as f32 / 255.0).max(1e-6))
            .unwrap_or(1.0);

        let mut input = Array4::<f32>::zeros((1, 3, side as usize, side as usize));
        for (x, y, px) in resized.enumerate_pixels() {
            for c in 0..3 {
                let v = px.0[c] as f32 / 255.0 / max;
                input[[0, c, y as usize, x as usize]] = (v - MEAN[c]) / STD[c];
            }
        }
        input
    }

    fn failure(&self, detail: impl Into<String>) -> DocPhotoError {
        DocPhotoError::SegmentationFailure {
            segmenter: self.name.clone(),
            detail: detail.into(),
        }
    }
}

impl Segmenter for OnnxSegmenter {
    fn name(&self) -> &str {
        &self.name
    }

    fn segment(&self, image: &RgbImage) -> Result<AlphaMask, DocPhotoError> {
        let input = self.preprocess(image);
        let side = self.input_size as usize;

        let saliency: Vec<f32> = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| self.failure("model session lock poisoned"))?;
            let tensor = TensorRef::from_array_view(input.view())
                .map_err(|e| self.failure(format!("input tensor: {e}")))?;
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| self.failure(format!("inference: {e}")))?;
            let (shape, data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| self.failure(format!("output tensor: {e}")))?;

            // [1, C, H, W]; channel 0 is the fused prediction
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            if dims.len() != 4 || dims[2] != side || dims[3] != side {
                return Err(self.failure(format!("unexpected output shape {dims:?}")));
            }
            data[..side * side].to_vec()
        };

        let (lo, hi) = saliency
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = (hi - lo).max(1e-6);
        debug!("{} saliency range [{:.4}, {:.4}]", self.name, lo, hi);

        let small = GrayImage::from_fn(side as u32, side as u32, |x, y| {
            let v = (saliency[y as usize * side + x as usize] - lo) / range;
            Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
        });
        Ok(imageops::resize(
            &small,
            image.width(),
            image.height(),
            FilterType::Lanczos3,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file_is_unavailable() {
        let err = OnnxSegmenter::from_file(Path::new("/no/such/model.onnx")).unwrap_err();
        assert!(matches!(err, DocPhotoError::SegmenterUnavailable { .. }));
    }

    #[test]
    fn unknown_model_name_is_unavailable() {
        let err = OnnxSegmenter::from_model("not-a-model", None).unwrap_err();
        assert!(err.to_string().contains("not-a-model"));
    }
}
