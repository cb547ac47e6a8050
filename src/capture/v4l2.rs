//! V4L2 camera driver.
//!
//! Opens a local device node (e.g. /dev/video0) in MJPEG mode so the sensor
//! hands out compressed frames directly. Each session owns its own device
//! file descriptor and mmap stream; closing the session drops both.

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use super::{CameraDriver, DriverHandle, SessionSettings};

/// Number of mmap buffers queued with the driver.
const STREAM_BUFFERS: u32 = 4;

/// Driver for a V4L2 device node.
pub struct V4l2Driver {
    device: String,
}

impl V4l2Driver {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
        }
    }
}

#[self_referencing]
struct V4l2Stream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// Open V4L2 capture session.
pub struct V4l2Handle {
    device: String,
    state: Option<V4l2Stream>,
}

impl CameraDriver for V4l2Driver {
    type Handle = V4l2Handle;

    fn open(&mut self, settings: &SessionSettings) -> Result<V4l2Handle> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open v4l2 device {}", self.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"MJPG");

        let format = device
            .set_format(&format)
            .with_context(|| format!("set MJPEG format on {}", self.device))?;
        if format.fourcc != v4l::FourCC::new(b"MJPG") {
            anyhow::bail!("{} does not support MJPEG capture", self.device);
        }
        if format.width != settings.width || format.height != settings.height {
            log::warn!(
                "V4l2Driver: {} negotiated {}x{} instead of {}x{}",
                self.device,
                format.width,
                format.height,
                settings.width,
                settings.height
            );
        }

        let fps = settings.rate.round().max(1.0) as u32;
        let params = v4l::video::capture::Parameters::with_fps(fps);
        device
            .set_params(&params)
            .with_context(|| format!("set {} fps on {}", fps, self.device))?;

        let state = V4l2StreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Driver: {} streaming MJPEG {}x{} at {} fps",
            self.device,
            format.width,
            format.height,
            fps
        );
        Ok(V4l2Handle {
            device: self.device.clone(),
            state: Some(state),
        })
    }
}

impl DriverHandle for V4l2Handle {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .with_context(|| format!("v4l2 device {} not open", self.device))?;
        state.with_mut(|fields| -> Result<()> {
            let (frame, meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("dequeue v4l2 buffer"))?;
            let used = (meta.bytesused as usize).min(frame.len());
            buf.extend_from_slice(&frame[..used]);
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the stream unmaps the buffers and stops streaming; dropping the
        // device closes the file descriptor.
        if self.state.take().is_some() {
            log::debug!("V4l2Driver: released {}", self.device);
        }
        Ok(())
    }
}
