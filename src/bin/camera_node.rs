//! camera_node - JPEG camera acquisition and publishing node
//!
//! This daemon:
//! 1. Loads node parameters (config file + env) and echoes them back
//! 2. Opens the camera at the high framerate and publishes every frame
//! 3. Switches between high and low framerate on request
//! 4. Saves intrinsic calibration sent by a calibration tool
//! 5. Closes the camera cleanly on Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use camera_node::transport::{
    connect_mqtt, parse_mqtt_endpoint, spawn_control_listener, subscribe_control, MqttFrameSink,
    Topics, DEFAULT_TOPIC_PREFIX,
};
use camera_node::{Camera, CameraNode, FrameSink, LogSink, NodeConfig};

const NODE_NAME: &str = "camera_node";

#[derive(Parser, Debug)]
#[command(author, version, about = "Camera acquisition and publishing node")]
struct Args {
    /// JSON parameter file (keys: high_rate, low_rate, resolution_width, ...).
    #[arg(long, env = "CAMERA_NODE_CONFIG")]
    config: Option<PathBuf>,

    /// MQTT broker address: `[mqtt|mqtts|tcp|ssl://]host[:port]`.
    #[arg(long, env = "MQTT_BROKER_ADDR", default_value = "127.0.0.1:1883")]
    mqtt_broker_addr: String,

    /// Enable TLS for MQTT (implied by mqtts:// addresses).
    #[arg(long, env = "MQTT_USE_TLS")]
    mqtt_use_tls: bool,

    /// MQTT client identifier.
    #[arg(long, env = "MQTT_CLIENT_ID", default_value = NODE_NAME)]
    mqtt_client_id: String,

    /// MQTT username for authentication.
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password for authentication.
    #[arg(long, env = "MQTT_PASSWORD")]
    mqtt_password: Option<String>,

    /// Prefix for the image, switch and calibration topics.
    #[arg(long, env = "CAMERA_NODE_TOPIC_PREFIX", default_value = DEFAULT_TOPIC_PREFIX)]
    topic_prefix: String,

    /// Run without a broker: frames are only logged (debug level).
    #[arg(long, env = "CAMERA_NODE_NO_MQTT")]
    no_mqtt: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (config, params) = NodeConfig::load(args.config.as_deref())?;
    log::debug!("effective parameters: {}", params.to_json());
    camera_node::config::validate_name("topic prefix", &args.topic_prefix)?;

    let node = CameraNode::new(config);
    let driver = Camera::new(&node.config().device)?;
    let control = node.control();

    let mut mqtt = None;
    let sink: Box<dyn FrameSink> = if args.no_mqtt {
        log::warn!("MQTT disabled - frames are not published");
        Box::new(LogSink::default())
    } else {
        let endpoint = parse_mqtt_endpoint(&args.mqtt_broker_addr, args.mqtt_use_tls)?;
        let (client, connection) = connect_mqtt(
            &endpoint,
            &args.mqtt_client_id,
            args.mqtt_username.as_deref(),
            args.mqtt_password.as_deref(),
        )?;
        let topics = Topics::new(&args.topic_prefix);
        subscribe_control(&client, &topics)?;
        let listener =
            spawn_control_listener(connection, client.clone(), topics.clone(), control.clone())?;
        log::info!("publishing frames on {}", topics.image);
        let sink = MqttFrameSink::new(client.clone(), &topics);
        mqtt = Some((client, listener));
        Box::new(sink)
    };

    let shutdown = control.clone();
    ctrlc::set_handler(move || shutdown.shutdown()).context("install Ctrl-C handler")?;

    let handle = node.start(driver, sink)?;
    let outcome = handle.join();
    // A fatal device error ends the loop without a shutdown request; make sure
    // the control side winds down as well.
    control.shutdown();

    if let Some((client, listener)) = mqtt {
        if let Err(err) = client.disconnect() {
            log::warn!("MQTT disconnect failed: {}", err);
        }
        drop(client);
        if listener.join().is_err() {
            log::warn!("MQTT control listener panicked");
        }
    }

    let summary = outcome?;
    log::info!(
        "{} sessions, {} frames published",
        summary.sessions_opened,
        summary.frames_emitted
    );
    Ok(())
}
