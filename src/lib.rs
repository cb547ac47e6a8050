//! Camera node
//!
//! Continuously captures JPEG frames from a camera at a configurable framerate,
//! stamps them and publishes them on a stream. The framerate can be switched
//! between a high and a low rate at runtime, and intrinsic calibration data can
//! be persisted on request.
//!
//! # Architecture
//!
//! Two execution contexts share state:
//!
//! 1. **Acquisition thread**: runs the `CaptureLoop`, the only code touching the
//!    capture session and its frame buffer.
//! 2. **Control callbacks**: the transport layer's threads, calling `NodeControl`
//!    to switch rates, save calibration, or shut down.
//!
//! Only `RateController` and `ShutdownFlag` are shared, both synchronised.
//! Rate changes take effect at the next session boundary: the loop closes the
//! session, adopts the pending rate and reopens.
//!
//! # Module Structure
//!
//! - `capture`: camera drivers and capture sessions
//! - `frame`: published frames, sinks, the frame emitter
//! - `rate`: framerate state and switch requests
//! - `capture_loop`: the acquisition state machine
//! - `calibration`: camera_info YAML persistence
//! - `node`: the owned node instance and its control surface
//! - `transport`: MQTT adapter
//! - `config`: parameter store and node configuration

pub mod calibration;
pub mod capture;
pub mod capture_loop;
pub mod config;
pub mod frame;
pub mod lifecycle;
pub mod node;
pub mod rate;
pub mod transport;

pub use calibration::{
    CalibrationRecord, CalibrationStore, CameraInfo, Matrix, SetCameraInfoResponse,
};
pub use capture::{Camera, CameraDriver, CaptureSession, DriverHandle, SessionSettings};
pub use capture_loop::{CaptureHandle, CaptureLoop, LoopState, LoopSummary};
pub use config::{CameraConfig, NodeConfig, ParamStore};
pub use frame::{Frame, FrameEmitter, FrameSink, LogSink, MemorySink, FORMAT_JPEG};
pub use lifecycle::ShutdownFlag;
pub use node::{CameraNode, NodeControl, NodeHandle};
pub use rate::{RateController, RateState};
