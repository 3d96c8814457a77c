use std::sync::Mutex;

use tempfile::NamedTempFile;

use vision_serve::ServeConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VISION_CONFIG",
        "VISION_DB_PATH",
        "VISION_DEFAULT_MODEL",
        "VISION_WEIGHTS",
        "VISION_OUTPUTS_DIR",
        "VISION_SCORE_THRESHOLD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = ServeConfig::load().expect("load config");
    assert_eq!(cfg.db_path, "vision.db");
    assert_eq!(cfg.default_model, "efficientnet_v2_b3");
    assert!(cfg.uses_stub_backends());

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "prod.db",
        "default_model": "mobilenet_v2",
        "weights": "/var/lib/vision/weights",
        "outputs_dir": "/var/lib/vision/outputs",
        "detection": {
            "score_threshold": 0.5,
            "conf": 0.3,
            "iou": 0.5
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("VISION_CONFIG", file.path());
    std::env::set_var("VISION_DB_PATH", "override.db");
    std::env::set_var("VISION_SCORE_THRESHOLD", "0.25");

    let cfg = ServeConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "override.db");
    assert_eq!(cfg.default_model, "mobilenet_v2");
    assert_eq!(cfg.weights, "/var/lib/vision/weights");
    assert!(!cfg.uses_stub_backends());
    assert_eq!(cfg.outputs_dir.to_string_lossy(), "/var/lib/vision/outputs");
    assert_eq!(cfg.detection.score_threshold, 0.25);
    assert_eq!(cfg.detection.conf, 0.3);
    assert_eq!(cfg.detection.iou, 0.5);

    clear_env();
}

#[test]
fn unparseable_env_threshold_is_a_validation_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("VISION_SCORE_THRESHOLD", "very high");
    let err = ServeConfig::load().unwrap_err();
    assert!(matches!(
        err,
        vision_serve::VisionError::Validation { .. }
    ));

    clear_env();
}
