//! Camera capture sessions.
//!
//! A capture session is an open hardware handle configured for one framerate
//! and resolution. Changing the rate means closing the session and opening a
//! new one; there is no in-place reconfiguration.
//!
//! Backends:
//! - `stub://<name>` devices (synthetic JPEG frames, always available)
//! - V4L2 devices producing MJPEG (feature: capture-v4l2)
//!
//! The capture layer is responsible for:
//! - Opening and releasing the device exactly once per session
//! - Writing each compressed frame into a reusable buffer
//!
//! The capture layer MUST NOT:
//! - Decode or process image data
//! - Retain frames beyond the next capture

pub mod synthetic;
#[cfg(feature = "capture-v4l2")]
pub mod v4l2;

use anyhow::{Context, Result};

pub use synthetic::{SyntheticDriver, SyntheticHandle};
#[cfg(feature = "capture-v4l2")]
pub use v4l2::{V4l2Driver, V4l2Handle};

/// Parameters a session is opened with.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionSettings {
    /// Frames per second.
    pub rate: f64,
    pub width: u32,
    pub height: u32,
}

/// A camera that can be opened into a capture session.
pub trait CameraDriver: Send {
    type Handle: DriverHandle;

    /// Configure the device and start capturing.
    fn open(&mut self, settings: &SessionSettings) -> Result<Self::Handle>;
}

/// An open hardware capture handle.
pub trait DriverHandle {
    /// Block until the driver has the next compressed frame and write it into `buf`.
    ///
    /// `buf` is empty on entry.
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<()>;

    /// Release the hardware resource.
    fn close(&mut self) -> Result<()>;
}

/// One open capture session.
///
/// Owns the driver handle and the reusable frame buffer. The handle is closed
/// exactly once: by `close()`, or on drop if `close()` was never called.
pub struct CaptureSession<H: DriverHandle> {
    handle: H,
    settings: SessionSettings,
    buffer: Vec<u8>,
    frames_captured: u64,
    closed: bool,
}

impl<H: DriverHandle> CaptureSession<H> {
    pub fn open<D>(driver: &mut D, settings: SessionSettings) -> Result<Self>
    where
        D: CameraDriver<Handle = H>,
    {
        let handle = driver.open(&settings).with_context(|| {
            format!(
                "open capture session at {} fps ({}x{})",
                settings.rate, settings.width, settings.height
            )
        })?;
        log::info!(
            "capture session opened at {} fps ({}x{})",
            settings.rate,
            settings.width,
            settings.height
        );
        Ok(Self {
            handle,
            settings,
            buffer: Vec::new(),
            frames_captured: 0,
            closed: false,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Pull the next frame from the device.
    ///
    /// Blocks until the driver delivers a frame. The returned buffer is reused by
    /// the next call, so the caller must copy out what it needs first.
    pub fn next_frame(&mut self) -> Result<&mut Vec<u8>> {
        if self.closed {
            anyhow::bail!("capture session already closed");
        }
        self.buffer.clear();
        self.handle
            .capture_into(&mut self.buffer)
            .context("capture frame")?;
        self.frames_captured += 1;
        Ok(&mut self.buffer)
    }

    /// Release the device. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();
        self.handle.close().context("close capture session")?;
        log::info!(
            "capture session at {} fps closed after {} frames",
            self.settings.rate,
            self.frames_captured
        );
        Ok(())
    }
}

impl<H: DriverHandle> Drop for CaptureSession<H> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("{:#}", err);
        }
    }
}

// ----------------------------------------------------------------------------
// Backend selection
// ----------------------------------------------------------------------------

/// Camera backend selected from a device path.
pub enum Camera {
    Synthetic(SyntheticDriver),
    #[cfg(feature = "capture-v4l2")]
    V4l2(V4l2Driver),
}

pub enum CameraHandle {
    Synthetic(SyntheticHandle),
    #[cfg(feature = "capture-v4l2")]
    V4l2(V4l2Handle),
}

impl Camera {
    /// `stub://` paths get the synthetic driver; anything else is a V4L2 device node.
    pub fn new(device: &str) -> Result<Self> {
        if device.starts_with("stub://") {
            return Ok(Self::Synthetic(SyntheticDriver::new(device)));
        }
        #[cfg(feature = "capture-v4l2")]
        {
            Ok(Self::V4l2(V4l2Driver::new(device)))
        }
        #[cfg(not(feature = "capture-v4l2"))]
        {
            anyhow::bail!(
                "device {} requires the capture-v4l2 feature \
                 (use stub://<name> for a synthetic camera)",
                device
            )
        }
    }
}

impl CameraDriver for Camera {
    type Handle = CameraHandle;

    fn open(&mut self, settings: &SessionSettings) -> Result<CameraHandle> {
        match self {
            Camera::Synthetic(driver) => driver.open(settings).map(CameraHandle::Synthetic),
            #[cfg(feature = "capture-v4l2")]
            Camera::V4l2(driver) => driver.open(settings).map(CameraHandle::V4l2),
        }
    }
}

impl DriverHandle for CameraHandle {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            CameraHandle::Synthetic(handle) => handle.capture_into(buf),
            #[cfg(feature = "capture-v4l2")]
            CameraHandle::V4l2(handle) => handle.capture_into(buf),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            CameraHandle::Synthetic(handle) => handle.close(),
            #[cfg(feature = "capture-v4l2")]
            CameraHandle::V4l2(handle) => handle.close(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
