use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::VisionError;

const DEFAULT_DB_PATH: &str = "vision.db";
const DEFAULT_MODEL: &str = "efficientnet_v2_b3";
const DEFAULT_WEIGHTS: &str = "stub://";
const DEFAULT_OUTPUTS_DIR: &str = "outputs";
const DEFAULT_SCORE_THRESHOLD: f32 = 0.4;
const DEFAULT_YOLO_CONF: f32 = 0.35;
const DEFAULT_YOLO_IOU: f32 = 0.45;

#[derive(Debug, Deserialize, Default)]
struct ServeConfigFile {
    db_path: Option<String>,
    default_model: Option<String>,
    weights: Option<String>,
    outputs_dir: Option<PathBuf>,
    detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    score_threshold: Option<f32>,
    conf: Option<f32>,
    iou: Option<f32>,
}

/// Runtime configuration for the inference service.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    /// SQLite history database path.
    pub db_path: String,
    /// Model id substituted when a request names an unregistered model.
    pub default_model: String,
    /// Model source. `stub://` selects the deterministic stub backends;
    /// any other value is a directory of `<model_id>.onnx` weights.
    pub weights: String,
    /// Root directory for annotated detection artifacts.
    pub outputs_dir: PathBuf,
    pub detection: DetectionSettings,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Minimum score for an item to appear in detection results.
    pub score_threshold: f32,
    /// Default confidence threshold for annotated (YOLO-style) runs.
    pub conf: f32,
    /// IoU threshold for non-maximum suppression in annotated runs.
    pub iou: f32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            conf: DEFAULT_YOLO_CONF,
            iou: DEFAULT_YOLO_IOU,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            weights: DEFAULT_WEIGHTS.to_string(),
            outputs_dir: PathBuf::from(DEFAULT_OUTPUTS_DIR),
            detection: DetectionSettings::default(),
        }
    }
}

impl ServeConfig {
    /// Load configuration from the JSON file named by `VISION_CONFIG` (if
    /// set), apply `VISION_*` environment overrides, then validate.
    pub fn load() -> Result<Self, VisionError> {
        let config_path = std::env::var("VISION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServeConfigFile) -> Self {
        let detection = file.detection.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            default_model: file
                .default_model
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            weights: file.weights.unwrap_or_else(|| DEFAULT_WEIGHTS.to_string()),
            outputs_dir: file
                .outputs_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUTS_DIR)),
            detection: DetectionSettings {
                score_threshold: detection.score_threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD),
                conf: detection.conf.unwrap_or(DEFAULT_YOLO_CONF),
                iou: detection.iou.unwrap_or(DEFAULT_YOLO_IOU),
            },
        }
    }

    fn apply_env(&mut self) -> Result<(), VisionError> {
        if let Ok(path) = std::env::var("VISION_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(model) = std::env::var("VISION_DEFAULT_MODEL") {
            if !model.trim().is_empty() {
                self.default_model = model;
            }
        }
        if let Ok(weights) = std::env::var("VISION_WEIGHTS") {
            if !weights.trim().is_empty() {
                self.weights = weights;
            }
        }
        if let Ok(dir) = std::env::var("VISION_OUTPUTS_DIR") {
            if !dir.trim().is_empty() {
                self.outputs_dir = PathBuf::from(dir);
            }
        }
        if let Ok(threshold) = std::env::var("VISION_SCORE_THRESHOLD") {
            let parsed: f32 = threshold.parse().map_err(|_| {
                VisionError::validation("VISION_SCORE_THRESHOLD", "must be a number")
            })?;
            self.detection.score_threshold = parsed;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), VisionError> {
        if self.default_model.trim().is_empty() {
            return Err(VisionError::validation(
                "default_model",
                "must not be empty",
            ));
        }
        for (name, value) in [
            ("detection.score_threshold", self.detection.score_threshold),
            ("detection.conf", self.detection.conf),
            ("detection.iou", self.detection.iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(VisionError::validation(name, "must be within [0, 1]"));
            }
        }
        Ok(())
    }

    /// True when the configuration selects the deterministic stub backends.
    pub fn uses_stub_backends(&self) -> bool {
        self.weights.starts_with("stub://")
    }

    /// Weights directory for file-backed backends.
    pub fn weights_dir(&self) -> PathBuf {
        PathBuf::from(&self.weights)
    }
}

fn read_config_file(path: &Path) -> Result<ServeConfigFile, VisionError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        VisionError::validation("config", format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        VisionError::validation("config", format!("invalid file {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_stub_backends() {
        let cfg = ServeConfig::default();
        assert!(cfg.uses_stub_backends());
        assert_eq!(cfg.default_model, "efficientnet_v2_b3");
        assert_eq!(cfg.detection.score_threshold, 0.4);
    }

    #[test]
    fn validate_rejects_out_of_range_thresholds() {
        let mut cfg = ServeConfig::default();
        cfg.detection.conf = 1.5;
        assert!(cfg.validate().is_err());

        cfg.detection.conf = 0.35;
        cfg.detection.iou = -0.1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_default_model() {
        let mut cfg = ServeConfig::default();
        cfg.default_model = "  ".to_string();
        assert!(cfg.validate().is_err());
    }
}
