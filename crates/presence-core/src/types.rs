use serde::{Deserialize, Serialize};

/// Face embedding vector (128-dimensional for the bundled embedder).
///
/// Opaque except for the distance operation; immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance to another embedding.
    ///
    /// Shorter vectors are compared over the common prefix; callers are
    /// expected to keep all embeddings at the same dimension.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

/// Facial landmark points, in frame coordinates.
///
/// The detector emits one point per feature. Sources that produce multiple
/// points per feature (eye contours etc.) collapse them via
/// [`Landmarks::from_point_sets`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: (f32, f32),
    pub right_eye: (f32, f32),
    pub nose_tip: (f32, f32),
    pub mouth_left: (f32, f32),
    pub mouth_right: (f32, f32),
}

impl Landmarks {
    /// Collapse multi-point features to their centroids.
    ///
    /// Returns `None` when either eye or the nose set is empty; a frame
    /// without usable landmarks is a "no face" condition, not an error.
    pub fn from_point_sets(
        left_eye: &[(f32, f32)],
        right_eye: &[(f32, f32)],
        nose_tip: &[(f32, f32)],
    ) -> Option<Self> {
        let le = centroid(left_eye)?;
        let re = centroid(right_eye)?;
        let nose = centroid(nose_tip)?;
        Some(Self {
            left_eye: le,
            right_eye: re,
            nose_tip: nose,
            mouth_left: (0.0, 0.0),
            mouth_right: (0.0, 0.0),
        })
    }
}

/// Mean point of a landmark set. `None` for an empty set.
pub fn centroid(points: &[(f32, f32)]) -> Option<(f32, f32)> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let (sx, sy) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(ax, ay), (x, y)| (ax + x, ay + y));
    Some((sx / n, sy / n))
}

/// Axis-aligned box for a detected face, with optional landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
}

impl FaceRegion {
    /// Scale the region (box and landmarks) by a uniform factor.
    ///
    /// Used to map detections made on a downscaled frame back into
    /// full-frame coordinates for overlay rendering.
    pub fn scaled(&self, factor: f32) -> FaceRegion {
        let scale_pt = |(x, y): (f32, f32)| (x * factor, y * factor);
        FaceRegion {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
            landmarks: self.landmarks.map(|lm| Landmarks {
                left_eye: scale_pt(lm.left_eye),
                right_eye: scale_pt(lm.right_eye),
                nose_tip: scale_pt(lm.nose_tip),
                mouth_left: scale_pt(lm.mouth_left),
                mouth_right: scale_pt(lm.mouth_right),
            }),
        }
    }
}

/// One recognized (or unrecognized) face from a worker cycle.
///
/// Ephemeral: produced per cycle, consumed by the dispatcher and the
/// overlay stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub region: FaceRegion,
    /// Matched employee code, or `None` for an unknown face.
    pub identity: Option<String>,
}

/// Semantic outcome of a recognition result after dispatch.
///
/// Presentation (colors, labels) is mapped from this closed set at the
/// rendering boundary, never the other way around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// No gallery entry within tolerance.
    Unknown,
    /// Recognized, but the cooldown window suppressed dispatch.
    NewMatch,
    /// Recognized and already marked today.
    AlreadyPresent,
    /// Recognized and attendance was just recorded.
    JustMarked,
    /// Recognized but dispatch failed (unknown employee, store error).
    Error,
}

/// A recognition result annotated with its dispatch outcome, ready for
/// overlay rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedResult {
    pub region: FaceRegion,
    pub identity: Option<String>,
    /// Full name when known (populated on a successful mark).
    pub display_name: Option<String>,
    pub status: ScanStatus,
}
