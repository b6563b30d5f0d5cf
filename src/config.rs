use std::path::PathBuf;

use crate::pipeline::{frame::Orientation, handpose::DetectorConfig};

pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_payload_size: usize,
    /// Empty means any origin.
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            cors_allowed_origins: Vec::new(),
        }
    }
}

/// Where the models live and how the recognition pipeline is tuned.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub classifier_model: PathBuf,
    /// `None` selects the A-Z alphabet.
    pub labels: Option<PathBuf>,
    pub models_dir: PathBuf,
    pub offline: bool,
    pub detector: DetectorConfig,
    pub orientation: Orientation,
    pub top_k: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            classifier_model: PathBuf::from("asl_model.onnx"),
            labels: None,
            models_dir: PathBuf::from("models"),
            offline: false,
            detector: DetectorConfig::default(),
            orientation: Orientation::mobile_front_camera(),
            top_k: 3,
        }
    }
}
