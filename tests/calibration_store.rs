use anyhow::Result;
use tempfile::TempDir;

use camera_node::{
    CalibrationRecord, CalibrationStore, CameraInfo, CameraNode, Matrix, NodeConfig,
};

fn identity_record() -> CalibrationRecord {
    CalibrationRecord {
        image_width: 640,
        image_height: 480,
        camera_name: "default".to_string(),
        distortion_model: "plumb_bob".to_string(),
        distortion_coefficients: Matrix::new(1, 5, &[0.0; 5]),
        camera_matrix: Matrix::new(3, 3, &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
        rectification_matrix: Matrix::new(
            3,
            3,
            &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        ),
        projection_matrix: Matrix::new(
            3,
            4,
            &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        ),
    }
}

fn sample_info() -> CameraInfo {
    CameraInfo {
        width: 640,
        height: 480,
        distortion_model: "plumb_bob".to_string(),
        d: vec![-0.28, 0.07, 0.001, -0.0005, 0.0],
        k: [305.5, 0.0, 320.1, 0.0, 306.2, 240.7, 0.0, 0.0, 1.0],
        r: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        p: [
            220.3, 0.0, 318.9, 0.0, 0.0, 250.8, 236.4, 0.0, 0.0, 0.0, 1.0, 0.0,
        ],
    }
}

#[test]
fn saved_record_reads_back_identically() -> Result<()> {
    let dir = TempDir::new()?;
    let store = CalibrationStore::new(dir.path());
    let path = store.path_for("default");
    let record = identity_record();

    assert!(store.save(&record, &path));
    assert_eq!(CalibrationStore::load(&path)?, record);
    Ok(())
}

#[test]
fn written_file_keeps_field_order() -> Result<()> {
    let dir = TempDir::new()?;
    let store = CalibrationStore::new(dir.path());
    let path = store.path_for("default");
    assert!(store.save(&identity_record(), &path));

    let raw = std::fs::read_to_string(&path)?;
    let doc: serde_yaml::Mapping = serde_yaml::from_str(&raw)?;
    let keys: Vec<String> = doc
        .keys()
        .filter_map(|key| key.as_str().map(str::to_string))
        .collect();
    assert_eq!(
        keys,
        vec![
            "image_width",
            "image_height",
            "camera_name",
            "distortion_model",
            "distortion_coefficients",
            "camera_matrix",
            "rectification_matrix",
            "projection_matrix",
        ]
    );
    Ok(())
}

#[test]
fn save_overwrites_existing_file() -> Result<()> {
    let dir = TempDir::new()?;
    let store = CalibrationStore::new(dir.path());
    let path = store.path_for("bot");
    std::fs::write(&path, "stale: true\n")?;

    let record = CalibrationRecord::from_camera_info(&sample_info(), "camera");
    assert!(store.save(&record, &path));
    assert_eq!(CalibrationStore::load(&path)?, record);
    Ok(())
}

#[test]
fn save_into_missing_directory_reports_failure() -> Result<()> {
    let dir = TempDir::new()?;
    let store = CalibrationStore::new(dir.path().join("does/not/exist"));
    let path = store.path_for("bot");

    assert!(!store.save(&identity_record(), &path));
    assert!(!path.exists());
    Ok(())
}

#[test]
fn node_set_camera_info_writes_namespace_file() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = NodeConfig::default();
    config.node_name = "/duckiebot/camera_node".to_string();
    config.namespace = "/duckiebot/".to_string();
    config.calibration_dir = dir.path().to_path_buf();
    let node = CameraNode::new(config);

    let response = node.control().set_camera_info(&sample_info());

    let expected = dir.path().join("duckiebot.yaml");
    assert!(response.success);
    assert_eq!(
        response.status_message,
        format!("Write to {}", expected.display())
    );
    let record = CalibrationStore::load(&expected)?;
    assert_eq!(record.camera_name, "duckiebot/camera_node");
    assert_eq!(record.camera_matrix.data, sample_info().k.to_vec());
    assert_eq!(record.projection_matrix.cols, 4);
    Ok(())
}

#[test]
fn node_set_camera_info_failure_is_reported_not_raised() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = NodeConfig::default();
    config.calibration_dir = dir.path().join("missing");
    let node = CameraNode::new(config);

    let response = node.control().set_camera_info(&sample_info());

    assert!(!response.success);
    assert!(response.status_message.starts_with("Failed to write"));
    assert!(response.status_message.contains("default.yaml"));
    Ok(())
}
