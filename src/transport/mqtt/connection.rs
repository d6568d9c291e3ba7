//! Pure MQTT connection configuration
//!
//! Turns a [`BrokerSection`] into `rumqttc` options. Every call produces a
//! fresh client id so a reconnect never collides with the session it
//! replaces.

use crate::config::BrokerSection;
use crate::transport::TransportError;
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use url::Url;

/// Largest inbound packet accepted; worker metrics and logs stay well below it
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Broker host, port and TLS flag extracted from a broker URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse `mqtt://host[:port]` or `mqtts://host[:port]`
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, TransportError> {
    let url =
        Url::parse(broker_url).map_err(|_| TransportError::InvalidBrokerUrl(broker_url.into()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(TransportError::InvalidBrokerUrl(broker_url.into())),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| TransportError::InvalidBrokerUrl(broker_url.into()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// `{prefix}_{8 random hex chars}`
pub fn generate_client_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &suffix[..8])
}

/// Build `rumqttc` options for one connection attempt
pub fn configure_mqtt_options(config: &BrokerSection) -> Result<MqttOptions, TransportError> {
    let address = parse_broker_url(&config.broker_url)?;
    let client_id = generate_client_id(&config.client_id_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, address.host, address.port);

    if address.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keepalive());
    // Subscriptions are replayed by the bridge after every connect.
    mqtt_options.set_clean_session(true);
    mqtt_options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    Ok(mqtt_options)
}
