//! Transport layer between the bridge and the broker
//!
//! [`Transport`] opens broker sessions; a [`Session`] is one live connection.
//! Inbound traffic and the session's end are reported on the
//! [`TransportEvent`] channel handed to [`Transport::connect`]. The bridge owns
//! reconnection, so a session never reconnects on its own: once it reports
//! [`TransportEvent::Closed`] it is finished.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Events emitted by a live session
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Message received on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// The session ended; no further events follow
    Closed { reason: String },
}

/// Wire-level transport errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Connection refused by broker: {0}")]
    ConnectionRefused(String),
    #[error("Publishing to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
    #[error("Subscription to {pattern} failed: {reason}")]
    SubscriptionFailed { pattern: String, reason: String },
    #[error("No acknowledgement for {target} within {timeout_ms}ms")]
    AckTimeout { target: String, timeout_ms: u64 },
    #[error("Session closed")]
    SessionClosed,
}

/// Opens sessions against the broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect and wait for the broker's acknowledgement. Events of the new
    /// session are sent on `events`.
    async fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn Session>, TransportError>;
}

/// One live broker connection
#[async_trait]
pub trait Session: Send + Sync {
    /// Publish with at-least-once delivery; resolves on broker acknowledgement
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Subscribe with at-least-once delivery; resolves on broker acknowledgement
    async fn subscribe(&self, pattern: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError>;

    /// Close the session gracefully
    async fn disconnect(&self) -> Result<(), TransportError>;
}

pub use mqtt::MqttTransport;
