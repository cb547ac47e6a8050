//! Pub-sub transport adapters.
//!
//! The node itself only knows `FrameSink` and `NodeControl`. This module maps
//! them onto MQTT topics: frames out, framerate switches and calibration
//! requests in.

mod endpoint;
pub mod mqtt;

pub use endpoint::{connect_mqtt, parse_mqtt_endpoint, MqttEndpoint};
pub use mqtt::{
    decode_frame, encode_frame, parse_control, spawn_control_listener, subscribe_control,
    ControlRequest, FrameHeader, MqttFrameSink, Topics, DEFAULT_TOPIC_PREFIX,
};
