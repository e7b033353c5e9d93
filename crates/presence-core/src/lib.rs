//! presence-core — recognition pipeline logic and face analysis.
//!
//! Pure pipeline components (gallery matching, pose classification, the
//! enrollment capture state machine, attendance debouncing, unknown-streak
//! tracking) plus the ONNX-backed face detector and embedding extractor.

pub mod analyzer;
pub mod debounce;
pub mod detector;
pub mod embedder;
pub mod enroll;
pub mod gallery;
pub mod pose;
pub mod streak;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
pub use gallery::{FirstWithinTolerance, Gallery, GalleryEntry, Matcher};
pub use pose::{Pose, PoseClassifier, PoseThresholds};
pub use types::{AnnotatedResult, Embedding, FaceRegion, Landmarks, RecognitionResult, ScanStatus};
