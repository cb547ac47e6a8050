//! Intrinsic calibration persistence.
//!
//! Calibration arrives as a `CameraInfo` message (from a calibration tool) and
//! is written as a camera_info YAML file named after the node namespace. The
//! top-level key order of the file is fixed:
//!
//! `image_width`, `image_height`, `camera_name`, `distortion_model`,
//! `distortion_coefficients`, `camera_matrix`, `rectification_matrix`,
//! `projection_matrix`.
//!
//! Writes are not atomic. A failed write may leave no file or a truncated one.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const DEFAULT_FILE_STEM: &str = "default";

/// Calibration payload of a set-camera-info request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub width: u32,
    pub height: u32,
    pub distortion_model: String,
    /// Distortion coefficients (5 for plumb_bob).
    #[serde(rename = "D")]
    pub d: Vec<f64>,
    /// 3x3 intrinsic matrix, row-major.
    #[serde(rename = "K")]
    pub k: [f64; 9],
    /// 3x3 rectification matrix, row-major.
    #[serde(rename = "R")]
    pub r: [f64; 9],
    /// 3x4 projection matrix, row-major.
    #[serde(rename = "P")]
    pub p: [f64; 12],
}

/// Row-major matrix as stored in camera_info files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: u32,
    pub cols: u32,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: u32, cols: u32, data: &[f64]) -> Self {
        Self {
            rows,
            cols,
            data: data.to_vec(),
        }
    }
}

/// One calibration file. Field order is the on-disk key order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub image_width: u32,
    pub image_height: u32,
    pub camera_name: String,
    pub distortion_model: String,
    pub distortion_coefficients: Matrix,
    pub camera_matrix: Matrix,
    pub rectification_matrix: Matrix,
    pub projection_matrix: Matrix,
}

impl CalibrationRecord {
    pub fn from_camera_info(info: &CameraInfo, camera_name: &str) -> Self {
        Self {
            image_width: info.width,
            image_height: info.height,
            camera_name: camera_name.trim_matches('/').to_string(),
            distortion_model: info.distortion_model.clone(),
            distortion_coefficients: Matrix::new(1, info.d.len() as u32, &info.d),
            camera_matrix: Matrix::new(3, 3, &info.k),
            rectification_matrix: Matrix::new(3, 3, &info.r),
            projection_matrix: Matrix::new(3, 4, &info.p),
        }
    }
}

/// Response to a set-camera-info request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCameraInfoResponse {
    pub success: bool,
    pub status_message: String,
}

/// Writes calibration files under one directory.
#[derive(Clone, Debug)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<dir>/<namespace>.yaml`, with `default.yaml` for the root namespace.
    pub fn path_for(&self, namespace: &str) -> PathBuf {
        let stem = namespace.trim_matches('/');
        let stem = if stem.is_empty() {
            DEFAULT_FILE_STEM
        } else {
            stem
        };
        self.dir.join(format!("{}.yaml", stem))
    }

    /// Write `record` to `path`, overwriting any existing file.
    ///
    /// Returns `false` on any I/O or serialization failure.
    pub fn save(&self, record: &CalibrationRecord, path: &Path) -> bool {
        match self.write(record, path) {
            Ok(()) => true,
            Err(err) => {
                log::error!("calibration save failed: {:#}", err);
                false
            }
        }
    }

    /// Like `save`, but reports why a write failed.
    pub fn write(&self, record: &CalibrationRecord, path: &Path) -> Result<()> {
        log::info!("saving calibration to {}", path.display());
        log::debug!("calibration {:?}", record);
        let file =
            File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_yaml::to_writer(&mut writer, record)
            .with_context(|| format!("serialize calibration to {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("flush {}", path.display()))?;
        Ok(())
    }

    /// Read a calibration file written by `save`.
    pub fn load(path: &Path) -> Result<CalibrationRecord> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read calibration {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid calibration file {}", path.display()))
    }
}
