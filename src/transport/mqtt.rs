//! MQTT realisation of the node's topics.
//!
//! Topics under a prefix (default `camera`):
//! - `<prefix>/image/compressed`: frame stream (frame envelope, QoS 0)
//! - `<prefix>/framerate_high_switch`: `{"data": true}` or bare `true`/`false`
//! - `<prefix>/set_camera_info`: `{"camera_info": {...}}`
//! - `<prefix>/set_camera_info/response`: `{"success": .., "status_message": ..}`
//!
//! Frame envelope: 4-byte big-endian header length, JSON header, JPEG bytes.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming};
use serde::{Deserialize, Serialize};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::calibration::CameraInfo;
use crate::frame::{Frame, FrameSink};
use crate::node::NodeControl;

pub const DEFAULT_TOPIC_PREFIX: &str = "camera";

const HEADER_LEN_BYTES: usize = 4;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Topic names for one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    pub image: String,
    pub framerate_switch: String,
    pub set_camera_info: String,
    pub set_camera_info_response: String,
}

impl Topics {
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        Self {
            image: format!("{}/image/compressed", prefix),
            framerate_switch: format!("{}/framerate_high_switch", prefix),
            set_camera_info: format!("{}/set_camera_info", prefix),
            set_camera_info_response: format!("{}/set_camera_info/response", prefix),
        }
    }
}

// ----------------------------------------------------------------------------
// Frame envelope
// ----------------------------------------------------------------------------

/// Metadata that precedes the JPEG bytes in a frame envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub format: String,
    pub frame_id: String,
    pub stamp_secs: u64,
    pub stamp_nanos: u32,
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    let stamp = frame.stamp();
    let header = FrameHeader {
        format: frame.format.to_string(),
        frame_id: frame.frame_id.clone(),
        stamp_secs: stamp.secs,
        stamp_nanos: stamp.nanos,
    };
    let header = serde_json::to_vec(&header).context("encode frame header")?;
    let header_len = u32::try_from(header.len()).context("frame header too large")?;

    let mut out = Vec::with_capacity(HEADER_LEN_BYTES + header.len() + frame.payload.len());
    out.extend_from_slice(&header_len.to_be_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&frame.payload);
    Ok(out)
}

/// Split an envelope into its header and JPEG payload.
pub fn decode_frame(bytes: &[u8]) -> Result<(FrameHeader, &[u8])> {
    if bytes.len() < HEADER_LEN_BYTES {
        return Err(anyhow!("frame envelope truncated"));
    }
    let (len_bytes, rest) = bytes.split_at(HEADER_LEN_BYTES);
    let header_len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
        as usize;
    if rest.len() < header_len {
        return Err(anyhow!(
            "frame header length {} exceeds envelope ({} bytes)",
            header_len,
            rest.len()
        ));
    }
    let (header, payload) = rest.split_at(header_len);
    let header = serde_json::from_slice(header).context("decode frame header")?;
    Ok((header, payload))
}

// ----------------------------------------------------------------------------
// Frame sink
// ----------------------------------------------------------------------------

/// Publishes frames with QoS 0 without waiting on the broker.
///
/// When the client's request queue is full the frame is dropped.
pub struct MqttFrameSink {
    client: Client,
    topic: String,
    published: u64,
    dropped: u64,
}

impl MqttFrameSink {
    pub fn new(client: Client, topics: &Topics) -> Self {
        Self {
            client,
            topic: topics.image.clone(),
            published: 0,
            dropped: 0,
        }
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for MqttFrameSink {
    fn publish(&mut self, frame: &Frame) {
        let payload = match encode_frame(frame) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("frame not published: {:#}", err);
                self.dropped += 1;
                return;
            }
        };
        match self
            .client
            .try_publish(self.topic.clone(), QoS::AtMostOnce, false, payload)
        {
            Ok(()) => self.published += 1,
            Err(err) => {
                self.dropped += 1;
                log::debug!(
                    "frame dropped on {} ({} dropped so far): {}",
                    self.topic,
                    self.dropped,
                    err
                );
            }
        }
    }
}

impl Drop for MqttFrameSink {
    fn drop(&mut self) {
        log::info!(
            "{} frames published on {}, {} dropped",
            self.published,
            self.topic,
            self.dropped
        );
    }
}

// ----------------------------------------------------------------------------
// Control requests
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum ControlRequest {
    FramerateSwitch(bool),
    SetCameraInfo(CameraInfo),
}

#[derive(Deserialize)]
struct SwitchMessage {
    data: bool,
}

#[derive(Deserialize)]
struct SetCameraInfoRequest {
    camera_info: CameraInfo,
}

/// Decode a control message. Returns `None` for topics the node does not handle.
pub fn parse_control(
    topics: &Topics,
    topic: &str,
    payload: &[u8],
) -> Result<Option<ControlRequest>> {
    if topic == topics.framerate_switch {
        let high = match serde_json::from_slice::<SwitchMessage>(payload) {
            Ok(msg) => msg.data,
            Err(_) => serde_json::from_slice::<bool>(payload)
                .context("framerate switch payload must be {\"data\": bool} or a bool")?,
        };
        return Ok(Some(ControlRequest::FramerateSwitch(high)));
    }
    if topic == topics.set_camera_info {
        let request: SetCameraInfoRequest =
            serde_json::from_slice(payload).context("invalid set_camera_info request")?;
        return Ok(Some(ControlRequest::SetCameraInfo(request.camera_info)));
    }
    Ok(None)
}

pub fn subscribe_control(client: &Client, topics: &Topics) -> Result<()> {
    client
        .subscribe(topics.framerate_switch.clone(), QoS::AtLeastOnce)
        .with_context(|| format!("subscribe {}", topics.framerate_switch))?;
    client
        .subscribe(topics.set_camera_info.clone(), QoS::AtLeastOnce)
        .with_context(|| format!("subscribe {}", topics.set_camera_info))?;
    log::info!(
        "subscribed to {} and {}",
        topics.framerate_switch,
        topics.set_camera_info
    );
    Ok(())
}

/// Drive the MQTT connection and dispatch control requests to the node.
///
/// Runs until the node is shutting down and the connection reports an error
/// or closes (the binary disconnects the client after the capture loop ends).
pub fn spawn_control_listener(
    mut connection: Connection,
    client: Client,
    topics: Topics,
    control: NodeControl,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("mqtt-control".to_string())
        .spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let topic = match std::str::from_utf8(&publish.topic) {
                            Ok(topic) => topic.to_string(),
                            Err(e) => {
                                log::warn!("skipping publish with invalid topic: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) =
                            handle_message(&client, &topics, &control, &topic, &publish.payload)
                        {
                            log::warn!("failed to process message on {}: {:#}", topic, e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if control.is_shutting_down() {
                            break;
                        }
                        log::warn!("MQTT connection error: {}. Reconnecting...", e);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
            log::info!("MQTT control listener stopped");
        })?;
    Ok(handle)
}

fn handle_message(
    client: &Client,
    topics: &Topics,
    control: &NodeControl,
    topic: &str,
    payload: &[u8],
) -> Result<()> {
    match parse_control(topics, topic, payload)? {
        Some(ControlRequest::FramerateSwitch(high)) => control.on_framerate_switch(high),
        Some(ControlRequest::SetCameraInfo(info)) => {
            let response = control.set_camera_info(&info);
            let body = serde_json::to_vec(&response).context("encode set_camera_info response")?;
            // The listener thread drives the event loop, so it must not block on a full queue.
            client
                .try_publish(
                    topics.set_camera_info_response.clone(),
                    QoS::AtLeastOnce,
                    false,
                    body,
                )
                .map_err(|e| anyhow!("publish set_camera_info response: {}", e))?;
        }
        None => log::debug!("ignoring message on {}", topic),
    }
    Ok(())
}
