//! Framerate state shared between the acquisition thread and control callbacks.
//!
//! Hardware reconfiguration needs a full capture-session restart, so switch
//! requests only record a pending target. The capture loop notices the pending
//! change between frames, reopens the session and then adopts the target.
//! Several requests arriving before that restart collapse into one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Snapshot of the framerate state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateState {
    /// Rate of the currently open (or about to be opened) capture session.
    pub current_rate: f64,
    /// Rate the next session will be opened with.
    pub target_rate: f64,
    /// A restart with `target_rate` is pending.
    pub dirty: bool,
}

/// Holds the high/low rate pair and the shared `RateState`.
///
/// Clones share the same state, so one handle can live on the acquisition
/// thread while others are handed to control callbacks.
#[derive(Clone, Debug)]
pub struct RateController {
    high_rate: f64,
    low_rate: f64,
    state: Arc<Mutex<RateState>>,
}

impl RateController {
    /// Create a controller that starts at the high rate.
    pub fn new(high_rate: f64, low_rate: f64) -> Self {
        Self {
            high_rate,
            low_rate,
            state: Arc::new(Mutex::new(RateState {
                current_rate: high_rate,
                target_rate: high_rate,
                dirty: false,
            })),
        }
    }

    pub fn high_rate(&self) -> f64 {
        self.high_rate
    }

    pub fn low_rate(&self) -> f64 {
        self.low_rate
    }

    pub fn request_high_rate(&self) -> bool {
        self.request_rate(self.high_rate)
    }

    pub fn request_low_rate(&self) -> bool {
        self.request_rate(self.low_rate)
    }

    /// Apply a framerate switch signal: `true` selects the high rate.
    ///
    /// Returns `true` if the pending target changed.
    pub fn switch(&self, high: bool) -> bool {
        if high {
            self.request_high_rate()
        } else {
            self.request_low_rate()
        }
    }

    /// Returns whether a restart is pending. Does not clear the flag.
    pub fn poll_restart_needed(&self) -> bool {
        self.lock().dirty
    }

    /// Make the pending target the current rate and clear `dirty`.
    ///
    /// Called by the capture loop once per session restart. Returns the rate the
    /// next session must be opened with.
    pub fn adopt_target_rate(&self) -> f64 {
        let mut state = self.lock();
        state.current_rate = state.target_rate;
        state.dirty = false;
        state.current_rate
    }

    /// Adopt a pending target that already equals the running rate.
    ///
    /// Returns `true` if such a restart was pending and is now settled without
    /// reopening. A target that differs from the running rate is left pending.
    pub fn settle_reverted_switch(&self) -> bool {
        let mut state = self.lock();
        if !state.dirty || state.target_rate != state.current_rate {
            return false;
        }
        state.dirty = false;
        true
    }

    pub fn current_rate(&self) -> f64 {
        self.lock().current_rate
    }

    pub fn snapshot(&self) -> RateState {
        *self.lock()
    }

    fn request_rate(&self, rate: f64) -> bool {
        let mut state = self.lock();
        // `target_rate == current_rate` whenever nothing is pending.
        if state.target_rate == rate {
            return false;
        }
        state.target_rate = rate;
        state.dirty = true;
        log::debug!(
            "framerate target {} fps (current {} fps)",
            state.target_rate,
            state.current_rate
        );
        true
    }

    fn lock(&self) -> MutexGuard<'_, RateState> {
        // Every write leaves RateState consistent, so a poisoned guard is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_high_rate_with_nothing_pending() {
        let rates = RateController::new(30.0, 15.0);
        assert_eq!(
            rates.snapshot(),
            RateState {
                current_rate: 30.0,
                target_rate: 30.0,
                dirty: false,
            }
        );
    }

    #[test]
    fn request_equal_to_current_rate_is_a_no_op() {
        let rates = RateController::new(30.0, 15.0);
        for _ in 0..5 {
            assert!(!rates.request_high_rate());
        }
        assert!(!rates.poll_restart_needed());
    }

    #[test]
    fn switch_marks_dirty_until_adopted() {
        let rates = RateController::new(30.0, 15.0);
        assert!(rates.switch(false));
        assert!(rates.poll_restart_needed());
        assert!(rates.poll_restart_needed(), "polling must not clear dirty");
        assert_eq!(rates.current_rate(), 30.0);

        assert_eq!(rates.adopt_target_rate(), 15.0);
        assert!(!rates.poll_restart_needed());
        assert_eq!(rates.current_rate(), 15.0);
    }

    #[test]
    fn pending_requests_coalesce_to_the_last_one() {
        let rates = RateController::new(30.0, 15.0);
        rates.request_low_rate();
        rates.request_high_rate();
        rates.request_low_rate();
        rates.request_low_rate();

        let state = rates.snapshot();
        assert!(state.dirty);
        assert_eq!(state.target_rate, 15.0);
        assert_eq!(rates.adopt_target_rate(), 15.0);
    }

    #[test]
    fn reverted_switch_settles_without_a_new_rate() {
        let rates = RateController::new(30.0, 15.0);
        rates.request_low_rate();
        assert!(!rates.settle_reverted_switch(), "15 fps is still pending");

        rates.request_high_rate();
        assert!(rates.poll_restart_needed());
        assert!(rates.settle_reverted_switch());
        assert!(!rates.poll_restart_needed());
        assert_eq!(rates.current_rate(), 30.0);
        assert!(!rates.settle_reverted_switch());
    }

    #[test]
    fn clones_share_state_across_threads() {
        let rates = RateController::new(30.0, 15.0);
        let remote = rates.clone();
        std::thread::spawn(move || {
            remote.request_low_rate();
        })
        .join()
        .unwrap();
        assert!(rates.poll_restart_needed());
    }
}
