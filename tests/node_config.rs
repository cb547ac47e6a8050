use std::sync::Mutex;

use serde_json::Value;
use tempfile::NamedTempFile;

use camera_node::config::{PARAM_HEIGHT, PARAM_HIGH_RATE, PARAM_LOW_RATE, PARAM_NAMESPACE};
use camera_node::NodeConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMERA_NODE_CONFIG",
        "CAMERA_NODE_HIGH_RATE",
        "CAMERA_NODE_LOW_RATE",
        "CAMERA_NODE_WIDTH",
        "CAMERA_NODE_HEIGHT",
        "CAMERA_NODE_NAME",
        "CAMERA_NODE_NAMESPACE",
        "CAMERA_NODE_DEVICE",
        "CAMERA_NODE_CALIBRATION_DIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "node_name": "duckiebot/camera_node",
        "namespace": "duckiebot",
        "device": "/dev/video0",
        "calibration_dir": "/tmp/calibrations",
        "high_rate": 20.0,
        "low_rate": 5.0,
        "resolution_width": 1280,
        "resolution_height": 720
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CAMERA_NODE_CONFIG", file.path());
    std::env::set_var("CAMERA_NODE_LOW_RATE", "2.5");
    std::env::set_var("CAMERA_NODE_HEIGHT", "960");

    let (cfg, params) = NodeConfig::load(None).expect("load config");

    assert_eq!(cfg.node_name, "duckiebot/camera_node");
    assert_eq!(cfg.namespace, "duckiebot");
    assert_eq!(cfg.device, "/dev/video0");
    assert_eq!(cfg.calibration_dir.to_str(), Some("/tmp/calibrations"));
    assert_eq!(cfg.camera.high_rate, 20.0);
    assert_eq!(cfg.camera.low_rate, 2.5);
    assert_eq!(cfg.camera.width, 1280);
    assert_eq!(cfg.camera.height, 960);

    assert_eq!(params.get(PARAM_LOW_RATE), Some(&Value::from(2.5)));
    assert_eq!(params.get(PARAM_HEIGHT), Some(&Value::from(960u32)));

    clear_env();
}

#[test]
fn missing_parameters_are_defaulted_and_echoed() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let (cfg, params) = NodeConfig::load(None).expect("load defaults");

    assert_eq!(cfg.camera.high_rate, 30.0);
    assert_eq!(cfg.camera.low_rate, 15.0);
    assert_eq!((cfg.camera.width, cfg.camera.height), (640, 480));
    assert_eq!(cfg.device, "stub://camera");
    assert_eq!(params.get(PARAM_HIGH_RATE), Some(&Value::from(30.0)));
    assert_eq!(params.get(PARAM_NAMESPACE), Some(&Value::from("")));

    clear_env();
}

#[test]
fn explicit_path_wins_over_env_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut explicit = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut explicit, br#"{"high_rate": 60.0}"#).expect("write config");
    std::env::set_var("CAMERA_NODE_CONFIG", "/nonexistent/camera_node.json");

    let (cfg, _) = NodeConfig::load(Some(explicit.path())).expect("load config");
    assert_eq!(cfg.camera.high_rate, 60.0);

    clear_env();
}

#[test]
fn rejects_malformed_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMERA_NODE_WIDTH", "wide");
    assert!(NodeConfig::load(None).is_err());
    clear_env();

    std::env::set_var("CAMERA_NODE_HIGH_RATE", "0");
    assert!(NodeConfig::load(None).is_err());
    clear_env();

    std::env::set_var("CAMERA_NODE_NAMESPACE", "bad namespace!");
    assert!(NodeConfig::load(None).is_err());
    clear_env();
}
