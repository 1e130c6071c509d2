use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables once at startup.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Directory for audit copies of enrolled face crops. Unset disables
    /// audit persistence.
    pub audit_image_dir: Option<PathBuf>,
    /// Maximum L2 distance for a match to count as a known identity.
    /// Unset disables the cutoff: unknown_probability stays 0.0 whenever
    /// the store has entries.
    pub unknown_distance_threshold: Option<f32>,
}

impl Config {
    /// Load configuration from `MIEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("MIEN_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| mien_core::default_model_dir());

        Self {
            model_dir,
            audit_image_dir: std::env::var("MIEN_AUDIT_IMAGE_DIR").ok().map(PathBuf::from),
            unknown_distance_threshold: env_opt_f32("MIEN_UNKNOWN_DISTANCE_THRESHOLD"),
        }
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn env_opt_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
