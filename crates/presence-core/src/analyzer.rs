//! The face-analysis seam: detection plus embedding extraction.
//!
//! The recognition worker and the enrollment loop depend on this trait,
//! not on the ONNX sessions directly, so tests can substitute scripted
//! analyzers and the model internals stay an opaque capability.

use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::{Embedding, FaceRegion};

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Detection and embedding extraction over RGB frames.
pub trait FaceAnalyzer: Send {
    /// Detect face regions (with landmarks where available).
    fn detect_faces(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, AnalyzerError>;

    /// Extract an embedding for one detected region.
    fn extract(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        region: &FaceRegion,
    ) -> Result<Embedding, AnalyzerError>;
}

/// Production analyzer combining the ONNX detector and embedder.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxFaceAnalyzer {
    pub fn load(detector_path: &str, embedder_path: &str) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(detector_path)?;
        let embedder = FaceEmbedder::load(embedder_path)?;
        Ok(Self { detector, embedder })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect_faces(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceRegion>, AnalyzerError> {
        Ok(self.detector.detect(rgb, width, height)?)
    }

    fn extract(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
        region: &FaceRegion,
    ) -> Result<Embedding, AnalyzerError> {
        Ok(self.embedder.extract(rgb, width, height, region)?)
    }
}
