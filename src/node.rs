//! The camera node: one owned instance per process.
//!
//! `CameraNode` holds the configuration and the state shared with control
//! callbacks. `start` moves the capture loop onto the acquisition thread and
//! returns a `NodeHandle`; `NodeControl` is the cloneable surface the
//! transport layer calls from its own threads.

use anyhow::Result;

use crate::calibration::{CalibrationRecord, CalibrationStore, CameraInfo, SetCameraInfoResponse};
use crate::capture::CameraDriver;
use crate::capture_loop::{CaptureHandle, CaptureLoop, LoopSummary};
use crate::config::NodeConfig;
use crate::frame::{optical_frame_id, FrameEmitter, FrameSink};
use crate::lifecycle::ShutdownFlag;
use crate::rate::RateController;

pub struct CameraNode {
    config: NodeConfig,
    control: NodeControl,
}

impl CameraNode {
    pub fn new(config: NodeConfig) -> Self {
        log::info!("[{}] initializing", config.node_name);
        let control = NodeControl {
            node_name: config.node_name.clone(),
            namespace: config.namespace.clone(),
            rates: RateController::new(config.camera.high_rate, config.camera.low_rate),
            shutdown: ShutdownFlag::new(),
            calibration: CalibrationStore::new(config.calibration_dir.clone()),
        };
        log::info!("[{}] initialized", config.node_name);
        Self { config, control }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn frame_id(&self) -> String {
        optical_frame_id(&self.config.namespace)
    }

    pub fn control(&self) -> NodeControl {
        self.control.clone()
    }

    /// Build the capture loop without starting it.
    pub fn capture_loop<D, S>(&self, driver: D, sink: S) -> CaptureLoop<D, S>
    where
        D: CameraDriver,
        S: FrameSink,
    {
        CaptureLoop::new(
            driver,
            FrameEmitter::new(sink, self.frame_id()),
            self.control.rates.clone(),
            self.control.shutdown.clone(),
            self.config.camera.width,
            self.config.camera.height,
        )
    }

    /// Start capturing on the acquisition thread.
    pub fn start<D, S>(&self, driver: D, sink: S) -> Result<NodeHandle>
    where
        D: CameraDriver + 'static,
        S: FrameSink + 'static,
    {
        let capture = self.capture_loop(driver, sink).spawn()?;
        Ok(NodeHandle {
            control: self.control(),
            capture,
        })
    }
}

/// Callback surface for the transport layer. Cheap to clone, safe to share.
#[derive(Clone, Debug)]
pub struct NodeControl {
    node_name: String,
    namespace: String,
    rates: RateController,
    shutdown: ShutdownFlag,
    calibration: CalibrationStore,
}

impl NodeControl {
    /// Framerate switch signal: `true` selects the high rate.
    pub fn on_framerate_switch(&self, high: bool) {
        log::info!("[{}] frequency switch to {}", self.node_name, high);
        if self.rates.switch(high) {
            let target = self.rates.snapshot().target_rate;
            log::info!(
                "[{}] capture will restart at {} fps",
                self.node_name,
                target
            );
        }
    }

    /// Persist a calibration under `<calibration_dir>/<namespace>.yaml`.
    pub fn set_camera_info(&self, info: &CameraInfo) -> SetCameraInfoResponse {
        let path = self.calibration.path_for(&self.namespace);
        let record = CalibrationRecord::from_camera_info(info, &self.node_name);
        match self.calibration.write(&record, &path) {
            Ok(()) => SetCameraInfoResponse {
                success: true,
                status_message: format!("Write to {}", path.display()),
            },
            Err(err) => {
                log::error!("[{}] {:#}", self.node_name, err);
                SetCameraInfoResponse {
                    success: false,
                    status_message: format!("Failed to write {}: {:#}", path.display(), err),
                }
            }
        }
    }

    /// Ask the capture loop to close its session and stop.
    pub fn shutdown(&self) {
        if self.shutdown.request() {
            log::info!("[{}] closing camera", self.node_name);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_requested()
    }

    pub fn rates(&self) -> &RateController {
        &self.rates
    }
}

/// A running node.
pub struct NodeHandle {
    control: NodeControl,
    capture: CaptureHandle,
}

impl NodeHandle {
    pub fn control(&self) -> NodeControl {
        self.control.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.capture.is_finished()
    }

    /// Wait for the capture loop to end (shutdown or fatal device error).
    pub fn join(self) -> Result<LoopSummary> {
        let result = self.capture.join();
        log::info!("[{}] shutdown", self.control.node_name);
        result
    }

    pub fn shutdown_and_join(self) -> Result<LoopSummary> {
        self.control.shutdown();
        self.join()
    }
}
