//! Pose-guided multi-sample capture for enrollment.
//!
//! A session collects exactly five embedding samples (three front, one
//! left, one right), gated on the subject holding the requested pose for
//! a run of consecutive frames.

use serde::{Deserialize, Serialize};

use crate::pose::Pose;
use crate::types::Embedding;

/// Total samples per enrollment.
pub const SAMPLES_REQUIRED: usize = 5;
/// Front-facing samples collected before turning left.
const FRONT_SAMPLES: usize = 3;

/// Capture progression. Advances forward only; `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaptureState {
    Idle,
    Front,
    Left,
    Right,
    Done,
}

impl CaptureState {
    /// Pose the subject must hold in this state. `None` for the inactive
    /// states.
    pub fn target_pose(&self) -> Option<Pose> {
        match self {
            CaptureState::Front => Some(Pose::Front),
            CaptureState::Left => Some(Pose::Left),
            CaptureState::Right => Some(Pose::Right),
            CaptureState::Idle | CaptureState::Done => None,
        }
    }
}

/// Progress snapshot for a progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollProgress {
    pub state: CaptureState,
    pub samples: usize,
    pub required: usize,
}

/// One enrollment attempt. Discarded on cancel or after the samples are
/// taken for saving.
#[derive(Debug)]
pub struct CaptureSession {
    state: CaptureState,
    samples: Vec<Embedding>,
    stability: u32,
    required_stability: u32,
}

impl CaptureSession {
    /// `required_stability` is the number of consecutive frames that must
    /// agree with the target pose before a sample is captured.
    pub fn new(required_stability: u32) -> Self {
        Self {
            state: CaptureState::Idle,
            samples: Vec::with_capacity(SAMPLES_REQUIRED),
            stability: 0,
            required_stability: required_stability.max(1),
        }
    }

    /// Start capturing. Only meaningful from `Idle`.
    pub fn begin(&mut self) {
        if self.state == CaptureState::Idle {
            self.state = CaptureState::Front;
            self.stability = 0;
        }
    }

    /// Feed one frame's pose observation. `None` means no face/landmarks
    /// were detected, which resets the stability run like any mismatch.
    ///
    /// Returns `true` when the stability requirement was just met and the
    /// caller should extract a sample from the current frame and hand it to
    /// [`record`](Self::record). The counter resets either way.
    pub fn observe(&mut self, pose: Option<Pose>) -> bool {
        let Some(target) = self.state.target_pose() else {
            return false;
        };

        if pose == Some(target) {
            self.stability += 1;
            if self.stability >= self.required_stability {
                self.stability = 0;
                return true;
            }
        } else {
            self.stability = 0;
        }
        false
    }

    /// Append a captured sample and advance the state machine.
    ///
    /// Ignored outside the active capture states, so a late extraction
    /// cannot push the session past five samples.
    pub fn record(&mut self, sample: Embedding) {
        if self.state.target_pose().is_none() {
            return;
        }
        self.samples.push(sample);
        self.state = match self.samples.len() {
            n if n < FRONT_SAMPLES => CaptureState::Front,
            n if n == FRONT_SAMPLES => CaptureState::Left,
            n if n == SAMPLES_REQUIRED - 1 => CaptureState::Right,
            _ => CaptureState::Done,
        };
        tracing::debug!(
            samples = self.samples.len(),
            state = ?self.state,
            "enrollment sample recorded"
        );
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn stability(&self) -> u32 {
        self.stability
    }

    pub fn samples_collected(&self) -> usize {
        self.samples.len()
    }

    pub fn is_done(&self) -> bool {
        self.state == CaptureState::Done
    }

    pub fn progress(&self) -> EnrollProgress {
        EnrollProgress {
            state: self.state,
            samples: self.samples.len(),
            required: SAMPLES_REQUIRED,
        }
    }

    /// Consume the session, yielding the five samples when complete.
    pub fn into_samples(self) -> Option<Vec<Embedding>> {
        if self.state == CaptureState::Done {
            Some(self.samples)
        } else {
            None
        }
    }
}
