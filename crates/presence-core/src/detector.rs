//! Face detector via ONNX Runtime.
//!
//! Runs a lightweight single-stride detection model ("det_lite"): one score
//! per grid cell plus center/size box deltas and five landmark points,
//! decoded against an 8-pixel grid and filtered with NMS.

use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

use crate::types::{FaceRegion, Landmarks};

const DET_INPUT_SIZE: usize = 320;
const DET_STRIDE: usize = 8;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.55;
const DET_NMS_THRESHOLD: f32 = 0.35;
const DET_LANDMARK_POINTS: usize = 5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Mapping from model input space back to frame coordinates.
///
/// The frame is stretch-resized (no letterboxing), so the two axes scale
/// independently.
struct InputMapping {
    scale_x: f32,
    scale_y: f32,
}

/// ONNX-backed face detector.
pub struct FaceDetector {
    session: Session,
    input_size: usize,
}

impl FaceDetector {
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded detection model"
        );

        Ok(Self {
            session,
            input_size: DET_INPUT_SIZE,
        })
    }

    /// Detect faces in an RGB frame (`width * height * 3` bytes).
    ///
    /// Returns regions in frame coordinates, sorted by descending
    /// confidence.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        if rgb.len() < (width * height * 3) as usize || width == 0 || height == 0 {
            return Err(DetectorError::InferenceFailed(format!(
                "frame buffer too short: {} bytes for {width}x{height}",
                rgb.len()
            )));
        }

        let (input, mapping) = self.preprocess(rgb, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, deltas) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("box deltas: {e}")))?;
        let (_, keypoints) = outputs[2]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("keypoints: {e}")))?;

        let candidates = decode_grid(
            scores,
            deltas,
            keypoints,
            self.input_size,
            &mapping,
            DET_CONFIDENCE_THRESHOLD,
        );

        let mut regions = nms(candidates, DET_NMS_THRESHOLD);
        regions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(regions)
    }

    /// Stretch-resize the RGB frame to the square model input and normalize
    /// into an NCHW tensor.
    fn preprocess(&self, rgb: &[u8], width: usize, height: usize) -> (Array4<f32>, InputMapping) {
        let size = self.input_size;
        let mapping = InputMapping {
            scale_x: width as f32 / size as f32,
            scale_y: height as f32 / size as f32,
        };

        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            // Nearest-neighbor sampling: detection tolerates the aliasing
            // and it keeps the per-frame cost low.
            let src_y = ((y as f32 + 0.5) * mapping.scale_y) as usize;
            let src_y = src_y.min(height - 1);
            for x in 0..size {
                let src_x = ((x as f32 + 0.5) * mapping.scale_x) as usize;
                let src_x = src_x.min(width - 1);
                let base = (src_y * width + src_x) * 3;
                for c in 0..3 {
                    let pixel = rgb[base + c] as f32;
                    tensor[[0, c, y, x]] = (pixel - DET_MEAN) / DET_STD;
                }
            }
        }

        (tensor, mapping)
    }
}

/// Decode the flat grid outputs into frame-space regions.
///
/// Cell layout: `scores[i]`, `deltas[i*4..]` = (dx, dy, w, h) in stride
/// units relative to the cell origin, `keypoints[i*10..]` = five (kx, ky)
/// pairs in the same units.
fn decode_grid(
    scores: &[f32],
    deltas: &[f32],
    keypoints: &[f32],
    input_size: usize,
    mapping: &InputMapping,
    threshold: f32,
) -> Vec<FaceRegion> {
    let grid = input_size / DET_STRIDE;
    let cells = grid * grid;
    let stride = DET_STRIDE as f32;

    let mut out = Vec::new();
    for i in 0..cells.min(scores.len()) {
        let score = scores[i];
        if score <= threshold {
            continue;
        }
        let d = i * 4;
        let k = i * 2 * DET_LANDMARK_POINTS;
        if d + 3 >= deltas.len() || k + 2 * DET_LANDMARK_POINTS > keypoints.len() {
            break;
        }

        let gx = (i % grid) as f32;
        let gy = (i / grid) as f32;

        let cx = (gx + deltas[d]) * stride;
        let cy = (gy + deltas[d + 1]) * stride;
        let w = deltas[d + 2] * stride;
        let h = deltas[d + 3] * stride;
        if w <= 0.0 || h <= 0.0 {
            continue;
        }

        let to_frame = |px: f32, py: f32| (px * mapping.scale_x, py * mapping.scale_y);

        let mut pts = [(0.0f32, 0.0f32); DET_LANDMARK_POINTS];
        for (p, pt) in pts.iter_mut().enumerate() {
            let lx = (gx + keypoints[k + p * 2]) * stride;
            let ly = (gy + keypoints[k + p * 2 + 1]) * stride;
            *pt = to_frame(lx, ly);
        }

        let (x, y) = to_frame(cx - w / 2.0, cy - h / 2.0);
        let (fw, fh) = (w * mapping.scale_x, h * mapping.scale_y);

        out.push(FaceRegion {
            x,
            y,
            width: fw,
            height: fh,
            confidence: score,
            landmarks: Some(Landmarks {
                left_eye: pts[0],
                right_eye: pts[1],
                nose_tip: pts[2],
                mouth_left: pts[3],
                mouth_right: pts[4],
            }),
        });
    }
    out
}

/// Greedy NMS: walk candidates by descending confidence, keeping each one
/// that overlaps no already-kept region beyond the threshold.
fn nms(mut candidates: Vec<FaceRegion>, iou_threshold: f32) -> Vec<FaceRegion> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<FaceRegion> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, w: f32, h: f32, conf: f32) -> FaceRegion {
        FaceRegion {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = region(0.0, 0.0, 50.0, 50.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = region(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = region(100.0, 100.0, 10.0, 10.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_drops_the_weaker_overlap() {
        let result = nms(
            vec![
                region(2.0, 2.0, 100.0, 100.0, 0.7),
                region(0.0, 0.0, 100.0, 100.0, 0.9),
                region(300.0, 300.0, 40.0, 40.0, 0.6),
            ],
            DET_NMS_THRESHOLD,
        );
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_non_overlapping_detections() {
        let result = nms(
            vec![
                region(0.0, 0.0, 20.0, 20.0, 0.8),
                region(200.0, 0.0, 20.0, 20.0, 0.7),
            ],
            DET_NMS_THRESHOLD,
        );
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn decode_skips_cells_below_threshold() {
        let grid = DET_INPUT_SIZE / DET_STRIDE;
        let cells = grid * grid;
        let scores = vec![0.0f32; cells];
        let deltas = vec![0.0f32; cells * 4];
        let kps = vec![0.0f32; cells * 10];
        let mapping = InputMapping {
            scale_x: 1.0,
            scale_y: 1.0,
        };
        let out = decode_grid(
            &scores,
            &deltas,
            &kps,
            DET_INPUT_SIZE,
            &mapping,
            DET_CONFIDENCE_THRESHOLD,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn decode_maps_cell_to_frame_coordinates() {
        let grid = DET_INPUT_SIZE / DET_STRIDE;
        let cells = grid * grid;
        let mut scores = vec![0.0f32; cells];
        let mut deltas = vec![0.0f32; cells * 4];
        let mut kps = vec![0.0f32; cells * 10];

        // One confident cell at grid (5, 3): centered box, 4 strides wide.
        let idx = 3 * grid + 5;
        scores[idx] = 0.95;
        deltas[idx * 4] = 0.5; // dx
        deltas[idx * 4 + 1] = 0.5; // dy
        deltas[idx * 4 + 2] = 4.0; // w
        deltas[idx * 4 + 3] = 4.0; // h
        // Nose keypoint (index 2) at the box center.
        kps[idx * 10 + 4] = 0.5;
        kps[idx * 10 + 5] = 0.5;

        // Frame is twice the input size on x, identical on y.
        let mapping = InputMapping {
            scale_x: 2.0,
            scale_y: 1.0,
        };
        let out = decode_grid(
            &scores,
            &deltas,
            &kps,
            DET_INPUT_SIZE,
            &mapping,
            DET_CONFIDENCE_THRESHOLD,
        );
        assert_eq!(out.len(), 1);

        let r = &out[0];
        let stride = DET_STRIDE as f32;
        // Input-space center (5.5, 3.5) * stride; box 32x32 input pixels.
        let expected_x = ((5.5 * stride) - 16.0) * 2.0;
        let expected_y = (3.5 * stride) - 16.0;
        assert!((r.x - expected_x).abs() < 1e-3, "x = {}", r.x);
        assert!((r.y - expected_y).abs() < 1e-3, "y = {}", r.y);
        assert!((r.width - 64.0).abs() < 1e-3);
        assert!((r.height - 32.0).abs() < 1e-3);

        let nose = r.landmarks.as_ref().unwrap().nose_tip;
        assert!((nose.0 - 5.5 * stride * 2.0).abs() < 1e-3);
        assert!((nose.1 - 3.5 * stride).abs() < 1e-3);
    }

    #[test]
    fn decode_rejects_degenerate_boxes() {
        let grid = DET_INPUT_SIZE / DET_STRIDE;
        let cells = grid * grid;
        let mut scores = vec![0.0f32; cells];
        let deltas = vec![0.0f32; cells * 4]; // zero-sized boxes
        let kps = vec![0.0f32; cells * 10];
        scores[0] = 0.9;
        let mapping = InputMapping {
            scale_x: 1.0,
            scale_y: 1.0,
        };
        let out = decode_grid(
            &scores,
            &deltas,
            &kps,
            DET_INPUT_SIZE,
            &mapping,
            DET_CONFIDENCE_THRESHOLD,
        );
        assert!(out.is_empty());
    }
}
