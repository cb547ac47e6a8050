//! Acquisition thread driver.
//!
//! ```text
//! STOPPED --open(current_rate)--> RUNNING(r)
//! RUNNING(r) --dirty or shutdown, checked before every frame--> RESTARTING
//! RUNNING(r) --dirty with target == r--> RUNNING(r), no reopen
//! RESTARTING --shutdown--> close --> SHUTDOWN
//! RESTARTING --close, adopt target, open(current_rate)--> RUNNING(r')
//! ```
//!
//! A failed open (initial or after a restart) is fatal: the loop ends in
//! `Shutdown` and returns the error without retrying. Supervision is the
//! hosting process's job. A failed close is logged and ignored.

use anyhow::{anyhow, Result};
use std::thread::JoinHandle;

use crate::capture::{CameraDriver, CaptureSession, SessionSettings};
use crate::frame::{FrameEmitter, FrameSink};
use crate::lifecycle::ShutdownFlag;
use crate::rate::RateController;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LoopState {
    Stopped,
    Running(f64),
    Restarting,
    Shutdown,
}

/// What a finished loop did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub sessions_opened: u64,
    pub frames_emitted: u64,
}

/// Why `drain` stopped pulling frames.
enum DrainExit {
    Restart,
    Shutdown,
}

pub struct CaptureLoop<D: CameraDriver, S: FrameSink> {
    driver: D,
    emitter: FrameEmitter<S>,
    rates: RateController,
    shutdown: ShutdownFlag,
    width: u32,
    height: u32,
    state: LoopState,
    sessions_opened: u64,
}

impl<D: CameraDriver, S: FrameSink> CaptureLoop<D, S> {
    pub fn new(
        driver: D,
        emitter: FrameEmitter<S>,
        rates: RateController,
        shutdown: ShutdownFlag,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            driver,
            emitter,
            rates,
            shutdown,
            width,
            height,
            state: LoopState::Stopped,
            sessions_opened: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn summary(&self) -> LoopSummary {
        LoopSummary {
            sessions_opened: self.sessions_opened,
            frames_emitted: self.emitter.frames_emitted(),
        }
    }

    /// Run until shutdown or a fatal device error.
    pub fn run(&mut self) -> Result<LoopSummary> {
        log::info!("start capturing");
        if self.shutdown.is_requested() {
            self.state = LoopState::Shutdown;
            log::info!("shutdown requested before capture started");
            return Ok(self.summary());
        }

        let mut session = self.open_session()?;
        loop {
            let exit = match self.drain(&mut session) {
                Ok(exit) => exit,
                Err(err) => {
                    self.close_session(&mut session);
                    self.state = LoopState::Shutdown;
                    return Err(err);
                }
            };

            self.state = LoopState::Restarting;
            self.close_session(&mut session);
            if let DrainExit::Shutdown = exit {
                break;
            }

            let rate = self.rates.adopt_target_rate();
            log::info!("restarting capture at {} fps", rate);
            session = self.open_session()?;
        }

        self.state = LoopState::Shutdown;
        let summary = self.summary();
        log::info!(
            "capture ended ({} sessions, {} frames)",
            summary.sessions_opened,
            summary.frames_emitted
        );
        Ok(summary)
    }

    /// Move the loop onto its own acquisition thread.
    pub fn spawn(self) -> Result<CaptureHandle>
    where
        D: 'static,
        S: 'static,
    {
        let mut capture = self;
        let join = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture.run())?;
        Ok(CaptureHandle { join })
    }

    fn open_session(&mut self) -> Result<CaptureSession<D::Handle>> {
        let settings = SessionSettings {
            rate: self.rates.current_rate(),
            width: self.width,
            height: self.height,
        };
        match CaptureSession::open(&mut self.driver, settings) {
            Ok(session) => {
                self.sessions_opened += 1;
                self.state = LoopState::Running(settings.rate);
                Ok(session)
            }
            Err(err) => {
                log::error!("{:#}", err);
                self.state = LoopState::Shutdown;
                Err(err)
            }
        }
    }

    fn drain(&mut self, session: &mut CaptureSession<D::Handle>) -> Result<DrainExit> {
        loop {
            if self.shutdown.is_requested() {
                return Ok(DrainExit::Shutdown);
            }
            if self.rates.poll_restart_needed() {
                if !self.rates.settle_reverted_switch() {
                    return Ok(DrainExit::Restart);
                }
                log::info!(
                    "framerate switch reverted, staying at {} fps",
                    self.rates.current_rate()
                );
            }
            let buffer = session.next_frame()?;
            self.emitter.emit(buffer);
            // Yield point between frames; pacing comes from the driver.
            std::thread::yield_now();
        }
    }

    fn close_session(&mut self, session: &mut CaptureSession<D::Handle>) {
        if let Err(err) = session.close() {
            log::warn!("ignoring capture close failure: {:#}", err);
        }
    }
}

/// Handle to a spawned capture loop.
#[derive(Debug)]
pub struct CaptureHandle {
    join: JoinHandle<Result<LoopSummary>>,
}

impl CaptureHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to end and return its outcome.
    pub fn join(self) -> Result<LoopSummary> {
        self.join
            .join()
            .map_err(|_| anyhow!("capture thread panicked"))?
    }
}
