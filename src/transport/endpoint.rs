//! MQTT broker addressing and connection setup.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{Client, Connection, MqttOptions};
use rumqttc::Transport;
use std::time::Duration;

/// Requests buffered between the client handle and the event loop.
const CLIENT_CAPACITY: usize = 10;

const MQTT_PORT: u16 = 1883;
const MQTTS_PORT: u16 = 8883;

/// Parsed MQTT endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Accepted URL schemes and whether each implies TLS.
const SCHEMES: &[(&str, bool)] = &[
    ("mqtt", false),
    ("tcp", false),
    ("mqtts", true),
    ("ssl", true),
];

/// Parse a broker address: `[scheme://]host[:port]`, with IPv6 hosts in brackets.
///
/// TLS schemes and `tls_override` turn TLS on. Without a port the standard
/// MQTT port is used (8883 with TLS, 1883 without).
pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let addr = addr.trim();
    let (scheme_tls, authority) = match addr.split_once("://") {
        Some((scheme, rest)) => {
            let tls = SCHEMES
                .iter()
                .find(|(name, _)| *name == scheme)
                .map(|(_, tls)| *tls)
                .ok_or_else(|| anyhow!("unsupported MQTT scheme: {}", scheme))?;
            (tls, rest.trim_end_matches('/'))
        }
        None => (false, addr),
    };
    let use_tls = tls_override || scheme_tls;

    let (host, port) =
        split_authority(authority).with_context(|| format!("invalid MQTT address {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let default_port = if use_tls { MQTTS_PORT } else { MQTT_PORT };
    Ok(MqttEndpoint {
        host: host.to_string(),
        port: port.unwrap_or(default_port),
        use_tls,
    })
}

/// Split `host[:port]` or `[v6-host][:port]`.
fn split_authority(authority: &str) -> Result<(&str, Option<u16>)> {
    let (host, port) = match authority.strip_prefix('[') {
        Some(bracketed) => {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| anyhow!("unterminated IPv6 literal"))?;
            if tail.is_empty() {
                (host, None)
            } else {
                let port = tail
                    .strip_prefix(':')
                    .ok_or_else(|| anyhow!("unexpected '{}' after IPv6 literal", tail))?;
                (host, Some(port))
            }
        }
        None => match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        },
    };
    let port = port
        .map(|raw| {
            raw.parse::<u16>()
                .with_context(|| format!("invalid port '{}'", raw))
        })
        .transpose()?;
    Ok((host, port))
}

/// Create a client for `endpoint`. The connection is established lazily by
/// iterating the returned `Connection`.
pub fn connect_mqtt(
    endpoint: &MqttEndpoint,
    client_id: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<(Client, Connection)> {
    let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
    options.set_keep_alive(Duration::from_secs(30));
    options.set_clean_start(true);
    if let Some(user) = username {
        options.set_credentials(user, password.unwrap_or_default());
    }
    if endpoint.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    let (client, connection) = Client::new(options, CLIENT_CAPACITY);
    log::info!(
        "MQTT client {} -> {}:{} (TLS: {}, auth: {})",
        client_id,
        endpoint.host,
        endpoint.port,
        endpoint.use_tls,
        username.is_some()
    );
    Ok((client, connection))
}
