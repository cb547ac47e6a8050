//! Synthetic camera for `stub://` devices.
//!
//! Produces real baseline JPEG images (a moving gradient) paced at the session
//! framerate, so the rest of the node can run without hardware.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::time::{Duration, Instant};

use super::{CameraDriver, DriverHandle, SessionSettings};

const JPEG_QUALITY: u8 = 75;

/// Driver for `stub://<name>` devices.
pub struct SyntheticDriver {
    device: String,
    sessions_opened: u64,
}

impl SyntheticDriver {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            sessions_opened: 0,
        }
    }

    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened
    }
}

impl CameraDriver for SyntheticDriver {
    type Handle = SyntheticHandle;

    fn open(&mut self, settings: &SessionSettings) -> Result<SyntheticHandle> {
        if !(settings.rate.is_finite() && settings.rate > 0.0) {
            anyhow::bail!("invalid framerate {} for {}", settings.rate, self.device);
        }
        if settings.width == 0 || settings.height == 0 {
            anyhow::bail!(
                "invalid resolution {}x{} for {}",
                settings.width,
                settings.height,
                self.device
            );
        }
        let interval = Duration::try_from_secs_f64(1.0 / settings.rate)
            .with_context(|| format!("framerate {} fps for {}", settings.rate, self.device))?;
        self.sessions_opened += 1;
        log::info!(
            "SyntheticDriver: {} streaming at {} fps (synthetic)",
            self.device,
            settings.rate
        );
        Ok(SyntheticHandle::new(*settings, interval))
    }
}

/// Open synthetic session.
pub struct SyntheticHandle {
    settings: SessionSettings,
    interval: Duration,
    next_due: Instant,
    frame_count: u64,
    pixels: Vec<u8>,
    open: bool,
}

impl SyntheticHandle {
    fn new(settings: SessionSettings, interval: Duration) -> Self {
        let pixel_bytes = settings.width as usize * settings.height as usize * 3;
        Self {
            settings,
            interval,
            next_due: Instant::now(),
            frame_count: 0,
            pixels: vec![0u8; pixel_bytes],
            open: true,
        }
    }

    /// Sleep until the next frame slot, like a sensor delivering at its framerate.
    fn wait_for_slot(&mut self) {
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
            self.next_due += self.interval;
        } else {
            // Fell behind (slow sink); restart pacing from now instead of bursting.
            self.next_due = now + self.interval;
        }
    }

    fn render(&mut self) {
        let width = self.settings.width as usize;
        let shift = self.frame_count as usize;
        for (i, px) in self.pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift / 2) % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
    }
}

impl DriverHandle for SyntheticHandle {
    fn capture_into(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        if !self.open {
            anyhow::bail!("synthetic session is closed");
        }
        self.wait_for_slot();
        self.frame_count += 1;
        self.render();

        let mut encoder = JpegEncoder::new_with_quality(&mut *buf, JPEG_QUALITY);
        encoder
            .encode(
                &self.pixels,
                self.settings.width,
                self.settings.height,
                ExtendedColorType::Rgb8,
            )
            .context("encode synthetic jpeg")?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            rate: 500.0,
            width: 32,
            height: 24,
        }
    }

    #[test]
    fn synthetic_frames_are_jpeg() -> Result<()> {
        let mut driver = SyntheticDriver::new("stub://test");
        let mut handle = driver.open(&fast_settings())?;

        let mut buf = Vec::new();
        handle.capture_into(&mut buf)?;
        assert!(buf.len() > 4);
        assert_eq!(&buf[..2], &[0xFF, 0xD8], "missing JPEG SOI marker");
        assert_eq!(&buf[buf.len() - 2..], &[0xFF, 0xD9], "missing JPEG EOI marker");
        Ok(())
    }

    #[test]
    fn synthetic_frames_are_paced_by_rate() -> Result<()> {
        let mut driver = SyntheticDriver::new("stub://test");
        let settings = SessionSettings {
            rate: 50.0,
            ..fast_settings()
        };
        let mut handle = driver.open(&settings)?;

        let start = Instant::now();
        let mut buf = Vec::new();
        for _ in 0..6 {
            buf.clear();
            handle.capture_into(&mut buf)?;
        }
        // First frame is immediate, the other five are 20ms apart.
        assert!(start.elapsed() >= Duration::from_millis(90));
        Ok(())
    }

    #[test]
    fn closed_handle_stops_producing() -> Result<()> {
        let mut driver = SyntheticDriver::new("stub://test");
        let mut handle = driver.open(&fast_settings())?;
        handle.close()?;
        assert!(handle.capture_into(&mut Vec::new()).is_err());
        Ok(())
    }

    #[test]
    fn rejects_invalid_settings() {
        let mut driver = SyntheticDriver::new("stub://test");
        let zero_rate = SessionSettings {
            rate: 0.0,
            ..fast_settings()
        };
        assert!(driver.open(&zero_rate).is_err());
        assert_eq!(driver.sessions_opened(), 0);
    }

    #[test]
    fn rate_too_low_to_pace_fails_to_open() {
        let mut driver = SyntheticDriver::new("stub://test");
        let glacial = SessionSettings {
            rate: 1e-30,
            ..fast_settings()
        };
        let err = match driver.open(&glacial) {
            Ok(_) => panic!("opening at 1e-30 fps must fail"),
            Err(err) => err,
        };
        let message = format!("{:#}", err);
        assert!(message.contains("framerate"), "{}", message);
        assert!(message.contains("stub://test"), "{}", message);
        assert_eq!(driver.sessions_opened(), 0);
    }
}
