//! Command-and-telemetry bridge over the broker
//!
//! Components, leaf first:
//!
//! - [`registry`] - patterns and their local callbacks
//! - [`dispatcher`] - fan-out of inbound messages to matching callbacks
//! - [`reconnect`] - pure capped-backoff policy
//! - [`status`] - connection health snapshots
//! - [`connection`] - the single broker connection: connect, reconnect,
//!   subscribe, publish
//! - [`publisher`] - start/stop/restart/config-update commands
//!
//! [`Bridge`] wires them together once; collaborators get cheap clones of the
//! handles they need.
//!
//! # Usage
//!
//! ```rust,no_run
//! use botbridge::bridge::Bridge;
//! use botbridge::config::BridgeConfig;
//! use botbridge::protocol::{Command, StopPayload, WorkerId};
//! use botbridge::transport::MqttTransport;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = BridgeConfig::default();
//! let transport = Arc::new(MqttTransport::new(config.broker.clone()));
//! let bridge = Bridge::new(transport, &config)?;
//!
//! let worker = WorkerId::new("bot-1")?;
//! bridge
//!     .publisher()
//!     .publish(&worker, Command::Stop(StopPayload::default()))
//!     .await?;
//! println!("{:?}", bridge.status().get_status());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod connection;
pub mod dispatcher;
pub mod publisher;
pub mod reconnect;
pub mod registry;
pub mod status;

pub use connection::{ConnectFailure, ConnectionManager, ConnectionSettings, PublishFailure};
pub use dispatcher::{DispatchOutcome, EventDispatcher};
pub use publisher::CommandPublisher;
pub use reconnect::{ReconnectConfig, ReconnectPolicy, ReconnectionDecision};
pub use registry::{Callback, CallbackError, CallbackId, Removal, SubscriptionRegistry};
pub use status::{ConnectionStatus, StatusReporter};

use crate::config::{BridgeConfig, ConfigError};
use crate::observability::metrics::BridgeMetrics;
use crate::protocol::TopicScheme;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

/// The explicitly constructed bridge: connection, publisher and status
#[derive(Clone)]
pub struct Bridge {
    manager: ConnectionManager,
    publisher: CommandPublisher,
    scheme: TopicScheme,
}

impl Bridge {
    pub fn new(transport: Arc<dyn Transport>, config: &BridgeConfig) -> Result<Self, ConfigError> {
        Ok(Self::from_parts(
            transport,
            config.topic_scheme()?,
            ConnectionSettings::from_config(config),
            config.commands.restart_grace(),
        ))
    }

    pub fn from_parts(
        transport: Arc<dyn Transport>,
        scheme: TopicScheme,
        settings: ConnectionSettings,
        restart_grace: Duration,
    ) -> Self {
        let metrics = Arc::new(BridgeMetrics::new());
        let manager = ConnectionManager::new(transport, settings, metrics);
        let publisher = CommandPublisher::new(manager.clone(), scheme.clone(), restart_grace);
        Self {
            manager,
            publisher,
            scheme,
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn publisher(&self) -> &CommandPublisher {
        &self.publisher
    }

    pub fn status(&self) -> StatusReporter {
        self.manager.status_reporter()
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        self.manager.metrics()
    }

    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }
}
