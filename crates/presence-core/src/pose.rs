//! Head pose classification from landmark geometry.

use serde::{Deserialize, Serialize};

use crate::types::Landmarks;

/// Coarse head orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Pose {
    Front,
    Left,
    Right,
}

/// Tunable classification bounds.
///
/// The default ratio bounds (0.6 / 1.4) and epsilon come straight from the
/// deployed system; their accuracy against real face geometry has not been
/// validated independently.
#[derive(Debug, Clone, Copy)]
pub struct PoseThresholds {
    /// Ratio at or below this is LEFT.
    pub left_max: f32,
    /// Ratio at or above this is RIGHT; the open interval between is FRONT.
    pub front_max: f32,
    /// Division-by-zero guard added to the right-side distance.
    pub epsilon: f32,
}

impl Default for PoseThresholds {
    fn default() -> Self {
        Self {
            left_max: 0.6,
            front_max: 1.4,
            epsilon: 1e-6,
        }
    }
}

/// Pure classifier mapping eye/nose geometry to a [`Pose`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseClassifier {
    thresholds: PoseThresholds,
}

impl PoseClassifier {
    pub fn new(thresholds: PoseThresholds) -> Self {
        Self { thresholds }
    }

    /// Horizontal nose-to-eye distance ratio for the given landmarks.
    pub fn ratio(&self, landmarks: &Landmarks) -> f32 {
        let dist_left = landmarks.nose_tip.0 - landmarks.left_eye.0;
        let dist_right = landmarks.right_eye.0 - landmarks.nose_tip.0;
        dist_left / (dist_right + self.thresholds.epsilon)
    }

    pub fn classify(&self, landmarks: &Landmarks) -> Pose {
        self.classify_ratio(self.ratio(landmarks))
    }

    /// Classify a precomputed ratio. Boundary values belong to LEFT and
    /// RIGHT; the FRONT interval is open on both ends.
    pub fn classify_ratio(&self, ratio: f32) -> Pose {
        if ratio > self.thresholds.left_max && ratio < self.thresholds.front_max {
            Pose::Front
        } else if ratio <= self.thresholds.left_max {
            Pose::Left
        } else {
            Pose::Right
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmarks(left_eye_x: f32, right_eye_x: f32, nose_x: f32) -> Landmarks {
        Landmarks {
            left_eye: (left_eye_x, 50.0),
            right_eye: (right_eye_x, 50.0),
            nose_tip: (nose_x, 70.0),
            mouth_left: (0.0, 0.0),
            mouth_right: (0.0, 0.0),
        }
    }

    #[test]
    fn centered_nose_is_front() {
        let c = PoseClassifier::default();
        assert_eq!(c.classify_ratio(1.0), Pose::Front);
    }

    #[test]
    fn low_ratio_is_left() {
        let c = PoseClassifier::default();
        assert_eq!(c.classify_ratio(0.3), Pose::Left);
    }

    #[test]
    fn high_ratio_is_right() {
        let c = PoseClassifier::default();
        assert_eq!(c.classify_ratio(3.0), Pose::Right);
    }

    #[test]
    fn lower_boundary_belongs_to_left() {
        let c = PoseClassifier::default();
        assert_eq!(c.classify_ratio(0.6), Pose::Left);
    }

    #[test]
    fn upper_boundary_belongs_to_right() {
        let c = PoseClassifier::default();
        assert_eq!(c.classify_ratio(1.4), Pose::Right);
    }

    #[test]
    fn ratio_from_symmetric_geometry() {
        // Nose equidistant from both eyes: ratio ~ 1.0.
        let c = PoseClassifier::default();
        let lm = landmarks(40.0, 80.0, 60.0);
        assert!((c.ratio(&lm) - 1.0).abs() < 1e-3);
        assert_eq!(c.classify(&lm), Pose::Front);
    }

    #[test]
    fn nose_near_left_eye_classifies_left() {
        let c = PoseClassifier::default();
        // dist_left = 4, dist_right = 36 → ratio ≈ 0.11
        let lm = landmarks(40.0, 80.0, 44.0);
        assert_eq!(c.classify(&lm), Pose::Left);
    }

    #[test]
    fn nose_near_right_eye_classifies_right() {
        let c = PoseClassifier::default();
        // dist_left = 36, dist_right = 4 → ratio = 9.0
        let lm = landmarks(40.0, 80.0, 76.0);
        assert_eq!(c.classify(&lm), Pose::Right);
    }

    #[test]
    fn epsilon_guards_zero_right_distance() {
        let c = PoseClassifier::default();
        // Nose exactly under the right eye: dist_right = 0.
        let lm = landmarks(40.0, 80.0, 80.0);
        let ratio = c.ratio(&lm);
        assert!(ratio.is_finite());
        assert_eq!(c.classify(&lm), Pose::Right);
    }
}
