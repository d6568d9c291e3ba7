//! botbridge - command and telemetry bridge for a trading bot fleet
//!
//! A publish/subscribe client over an MQTT broker that sits between a trading
//! dashboard backend and the bot processes ("workers") it controls.
//!
//! # Overview
//!
//! - [`protocol`]: topic namespace, wildcard matching, command and telemetry payloads
//! - [`transport`]: the broker seam and its MQTT 3.1.1 implementation
//! - [`bridge`]: connection management with single-flight connect and capped
//!   reconnection, subscription registry, dispatch, command publishing, status
//! - [`ingest`]: telemetry and status ingestion into a persistence interface
//! - [`store`]: in-process implementation of that interface
//! - [`health`], [`observability`]: health checks, HTTP surface, metrics, logging
//!
//! # Quick Start
//!
//! ```rust
//! use botbridge::protocol::{Command, CommandEnvelope, CommandKind, TopicScheme, WorkerId};
//! use serde_json::json;
//!
//! let scheme = TopicScheme::default();
//! let worker = WorkerId::new("bot-1").unwrap();
//! let command = Command::from_request(CommandKind::Start, json!({"script": "pmm.py"})).unwrap();
//!
//! let wire = CommandEnvelope::new(worker, command)
//!     .encode(&scheme)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(wire.topic, "hbot/bot-1/start");
//!
//! let payload: serde_json::Value = serde_json::from_slice(&wire.payload).unwrap();
//! assert_eq!(payload["script"], "pmm.py");
//! assert_eq!(payload["is_quickstart"], true);
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod ingest;
pub mod observability;
pub mod protocol;
pub mod store;
pub mod testing;
pub mod transport;

pub use bridge::{Bridge, CommandPublisher, ConnectionManager, ConnectionStatus, StatusReporter};
pub use config::{BridgeConfig, ConfigError};
pub use error::{BridgeError, BridgeResult};
pub use ingest::{StatusSync, TelemetryIngestor};
pub use protocol::{topic_matches, Command, CommandKind, TopicPattern, TopicScheme, WorkerId};
pub use store::MemoryStore;
pub use transport::mqtt::MqttTransport;
