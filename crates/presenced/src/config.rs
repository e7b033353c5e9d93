use std::path::PathBuf;
use std::time::Duration;

use presence_core::pose::PoseThresholds;

/// Daemon configuration, loaded from `PRESENCE_*` environment variables.
///
/// The recognition tunables (tolerance, cooldown, streak limit, stability
/// frames, pose ratio bounds) ship with the values the deployed system
/// used; none of them has a documented derivation, so they are exposed
/// here rather than baked in as literals.
pub struct Config {
    /// Primary V4L2 device path.
    pub camera_device: String,
    /// Alternate device tried once when the primary fails to open.
    pub camera_alternate: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance at or under which two embeddings are the same
    /// person.
    pub match_tolerance: f32,
    /// Minimum time between repeated dispatches for one identity.
    pub dispatch_cooldown: Duration,
    /// Consecutive no-match cycles before the manual-entry fallback
    /// surfaces.
    pub unknown_streak_limit: u32,
    /// Consecutive on-pose frames required per enrollment sample.
    pub stability_frames: u32,
    /// Pose ratio bounds and epsilon.
    pub pose: PoseThresholds,
    /// Frame downscale factor for live recognition.
    pub scan_scale: f32,
    /// Frame downscale factor during enrollment capture.
    pub enroll_scale: f32,
    /// Capture loop tick.
    pub capture_tick: Duration,
    /// Worker sleep when the handoff slot is empty.
    pub worker_idle: Duration,
    /// Consecutive frame-read failures tolerated before the session dies.
    pub capture_failure_limit: u32,
    /// Office Wi-Fi SSID required for manual marks. Empty disables the
    /// check (fails open, dev mode).
    pub office_ssid: String,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let model_dir = std::env::var("PRESENCE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let db_path = std::env::var("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            camera_device: std::env::var("PRESENCE_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_alternate: std::env::var("PRESENCE_CAMERA_ALTERNATE")
                .unwrap_or_else(|_| "/dev/video1".to_string()),
            model_dir,
            db_path,
            match_tolerance: env_f32("PRESENCE_MATCH_TOLERANCE", 0.5),
            dispatch_cooldown: Duration::from_secs(env_u64("PRESENCE_COOLDOWN_SECS", 5)),
            unknown_streak_limit: env_u32("PRESENCE_UNKNOWN_STREAK_LIMIT", 31),
            stability_frames: env_u32("PRESENCE_STABILITY_FRAMES", 8),
            pose: PoseThresholds {
                left_max: env_f32("PRESENCE_POSE_LEFT_MAX", 0.6),
                front_max: env_f32("PRESENCE_POSE_FRONT_MAX", 1.4),
                epsilon: env_f32("PRESENCE_POSE_EPSILON", 1e-6),
            },
            scan_scale: env_f32("PRESENCE_SCAN_SCALE", 0.25),
            enroll_scale: env_f32("PRESENCE_ENROLL_SCALE", 0.5),
            capture_tick: Duration::from_millis(env_u64("PRESENCE_CAPTURE_TICK_MS", 30)),
            worker_idle: Duration::from_millis(env_u64("PRESENCE_WORKER_IDLE_MS", 15)),
            capture_failure_limit: env_u32("PRESENCE_CAPTURE_FAILURE_LIMIT", 100),
            office_ssid: std::env::var("PRESENCE_OFFICE_SSID").unwrap_or_default(),
        }
    }

    /// Path to the face detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("det_lite_320.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_dir
            .join("embed_mfn_128.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
