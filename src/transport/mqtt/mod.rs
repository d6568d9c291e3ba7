//! MQTT 3.1.1 transport built on `rumqttc`
//!
//! Split the same way as the rest of the transport layer: pure pieces first,
//! I/O last.
//!
//! - [`connection`] - broker URL parsing and client options
//! - [`message_handler`] - event routing and acknowledgement bookkeeping
//! - [`client`] - the [`MqttTransport`] and its sessions
//!
//! # Usage
//!
//! ```rust,no_run
//! use botbridge::config::BrokerSection;
//! use botbridge::transport::{MqttTransport, Transport};
//!
//! # tokio_test::block_on(async {
//! let transport = MqttTransport::new(BrokerSection::default());
//! let (events_tx, _events_rx) = tokio::sync::mpsc::channel(64);
//! let session = transport.connect(events_tx).await?;
//! session.subscribe("hbot/+/status").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttSession, MqttTransport};
pub use connection::{configure_mqtt_options, parse_broker_url, BrokerAddress};
pub use message_handler::{EventRoute, PendingAcks};
