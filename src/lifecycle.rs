//! Node lifecycle flag.
//!
//! `ShutdownFlag` is set once by the hosting process (Ctrl-C, supervisor stop)
//! and never cleared. The capture loop observes it cooperatively between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, set-once shutdown flag.
///
/// Clones share the same underlying flag.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the call that flipped the flag.
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
