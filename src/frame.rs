//! Published frames and the emitter that stamps them.
//!
//! - `Frame`: one compressed image plus capture metadata, handed to the sink once.
//! - `FrameSink`: where frames go (MQTT topic, in-memory recorder, log).
//! - `FrameEmitter`: copies the capture buffer out, stamps it, publishes it.
//!
//! There is no queue between capture and publish: at most one frame is in
//! flight, and a slow sink slows the acquisition thread down with it.

use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Format tag carried by every published frame.
pub const FORMAT_JPEG: &str = "jpeg";

const OPTICAL_FRAME_SUFFIX: &str = "camera_optical_frame";

/// Frame id for a node namespace: `<namespace>/camera_optical_frame`.
pub fn optical_frame_id(namespace: &str) -> String {
    let namespace = namespace.trim_matches('/');
    if namespace.is_empty() {
        OPTICAL_FRAME_SUFFIX.to_string()
    } else {
        format!("{}/{}", namespace, OPTICAL_FRAME_SUFFIX)
    }
}

/// One captured image, ready to publish.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub format: &'static str,
    pub payload: Vec<u8>,
    pub captured_at: SystemTime,
    pub frame_id: String,
}

/// Wall-clock stamp split the way camera message headers carry it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Stamp {
    pub secs: u64,
    pub nanos: u32,
}

impl Frame {
    pub fn stamp(&self) -> Stamp {
        // Clocks set before 1970 stamp as zero rather than failing the publish.
        let since_epoch = self
            .captured_at
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Stamp {
            secs: since_epoch.as_secs(),
            nanos: since_epoch.subsec_nanos(),
        }
    }
}

/// Destination for published frames.
///
/// `publish` must not block indefinitely; delivery is fire-and-forget.
pub trait FrameSink: Send {
    fn publish(&mut self, frame: &Frame);
}

impl<T: FrameSink + ?Sized> FrameSink for Box<T> {
    fn publish(&mut self, frame: &Frame) {
        (**self).publish(frame)
    }
}

/// Records every frame. Clones share the recording.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for MemorySink {
    fn publish(&mut self, frame: &Frame) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
    }
}

/// Logs frame metadata at debug level and drops the payload.
#[derive(Debug, Default)]
pub struct LogSink {
    published: u64,
}

impl FrameSink for LogSink {
    fn publish(&mut self, frame: &Frame) {
        self.published += 1;
        log::debug!(
            "frame #{} {} {} bytes ({})",
            self.published,
            frame.frame_id,
            frame.payload.len(),
            frame.format
        );
    }
}

type FirstFrameHook = Box<dyn FnMut() + Send>;

/// Stamps captured buffers and forwards them to the sink.
///
/// Lives as long as the node, across capture-session restarts, so the
/// first-frame notification fires once per node lifetime.
pub struct FrameEmitter<S: FrameSink> {
    sink: S,
    frame_id: String,
    has_published: bool,
    on_first_frame: Option<FirstFrameHook>,
    frames_emitted: u64,
}

impl<S: FrameSink> FrameEmitter<S> {
    pub fn new(sink: S, frame_id: impl Into<String>) -> Self {
        Self {
            sink,
            frame_id: frame_id.into(),
            has_published: false,
            on_first_frame: None,
            frames_emitted: 0,
        }
    }

    /// Run `hook` once, right after the first frame is published.
    pub fn with_first_frame_hook(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_first_frame = Some(Box::new(hook));
        self
    }

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn has_published(&self) -> bool {
        self.has_published
    }

    /// Publish the contents of `buffer` as a frame and clear the buffer.
    pub fn emit(&mut self, buffer: &mut Vec<u8>) -> Frame {
        let frame = Frame {
            format: FORMAT_JPEG,
            payload: buffer.clone(),
            captured_at: SystemTime::now(),
            frame_id: self.frame_id.clone(),
        };
        self.sink.publish(&frame);
        buffer.clear();
        self.frames_emitted += 1;

        if !self.has_published {
            self.has_published = true;
            log::info!("published the first image ({})", self.frame_id);
            if let Some(hook) = self.on_first_frame.as_mut() {
                hook();
            }
        }
        frame
    }
}
