//! Face embedding extraction via ONNX Runtime.
//!
//! Crops the detected face region (with margin), resizes to the model
//! input, and produces an L2-normalized 128-dimensional embedding.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

use crate::types::{Embedding, FaceRegion};

const EMB_INPUT_SIZE: usize = 112;
const EMB_MEAN: f32 = 127.5;
const EMB_STD: f32 = 127.5;
const EMB_DIM: usize = 128;
/// Box expansion on each side before cropping, as a fraction of the box.
const EMB_CROP_MARGIN: f32 = 0.2;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face region lies outside the frame")]
    RegionOutOfFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX-backed embedding extractor.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded embedding model");
        Ok(Self { session })
    }

    /// Extract an embedding for a detected face in an RGB frame.
    pub fn extract(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        region: &FaceRegion,
    ) -> Result<Embedding, EmbedderError> {
        let crop = crop_rect(region, width, height).ok_or(EmbedderError::RegionOutOfFrame)?;
        let input = preprocess_crop(rgb, width as usize, crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding: {e}")))?;

        if raw.len() != EMB_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMB_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalize(raw)))
    }
}

/// Integer crop rectangle (x, y, w, h) for the region expanded by the
/// margin and clamped to the frame. `None` when nothing of the region is
/// inside the frame.
fn crop_rect(region: &FaceRegion, width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
    let mx = region.width * EMB_CROP_MARGIN;
    let my = region.height * EMB_CROP_MARGIN;

    let x0 = (region.x - mx).max(0.0) as usize;
    let y0 = (region.y - my).max(0.0) as usize;
    let x1 = ((region.x + region.width + mx).min(width as f32)) as usize;
    let y1 = ((region.y + region.height + my).min(height as f32)) as usize;

    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, x1 - x0, y1 - y0))
}

/// Resize the crop to the model input and normalize into an NCHW tensor.
fn preprocess_crop(
    rgb: &[u8],
    frame_width: usize,
    (cx, cy, cw, ch): (usize, usize, usize, usize),
) -> Array4<f32> {
    let size = EMB_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        let src_y = cy + (y * ch) / size;
        for x in 0..size {
            let src_x = cx + (x * cw) / size;
            let base = (src_y * frame_width + src_x) * 3;
            for c in 0..3 {
                let pixel = rgb.get(base + c).copied().unwrap_or(0) as f32;
                tensor[[0, c, y, x]] = (pixel - EMB_MEAN) / EMB_STD;
            }
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, w: f32, h: f32) -> FaceRegion {
        FaceRegion {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn crop_expands_by_margin_and_clamps() {
        let r = region(10.0, 10.0, 100.0, 100.0);
        let (x, y, w, h) = crop_rect(&r, 640, 480).unwrap();
        // Margin is 20px on each side; nothing clamps here.
        assert_eq!((x, y), (0, 0));
        assert_eq!((w, h), (130, 130));
    }

    #[test]
    fn crop_clamps_at_frame_edges() {
        let r = region(600.0, 440.0, 100.0, 100.0);
        let (x, y, w, h) = crop_rect(&r, 640, 480).unwrap();
        assert_eq!((x, y), (580, 420));
        assert_eq!((x + w, y + h), (640, 480));
    }

    #[test]
    fn fully_outside_region_is_rejected() {
        let r = region(700.0, 500.0, 50.0, 50.0);
        assert!(crop_rect(&r, 640, 480).is_none());
    }

    #[test]
    fn preprocess_shape_and_normalization() {
        // Uniform mid-gray crop normalizes to ~0.
        let w = 64usize;
        let h = 64usize;
        let rgb = vec![128u8; w * h * 3];
        let tensor = preprocess_crop(&rgb, w, (0, 0, w, h));
        assert_eq!(tensor.shape(), &[1, 3, EMB_INPUT_SIZE, EMB_INPUT_SIZE]);
        let expected = (128.0 - EMB_MEAN) / EMB_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
        assert!((tensor[[0, 2, 111, 111]] - expected).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector_alone() {
        let v = l2_normalize(&[0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }
}
