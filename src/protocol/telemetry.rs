//! Inbound telemetry payloads published by workers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Longest payload excerpt kept in parse errors and logs
pub const PAYLOAD_EXCERPT_LIMIT: usize = 256;

/// Inbound payload could not be decoded
#[derive(Debug, Error)]
#[error("Malformed payload on {topic}: {source} (payload: {excerpt})")]
pub struct PayloadError {
    pub topic: String,
    pub excerpt: String,
    #[source]
    pub source: serde_json::Error,
}

impl PayloadError {
    pub fn new(topic: &str, payload: &[u8], source: serde_json::Error) -> Self {
        Self {
            topic: topic.to_string(),
            excerpt: payload_excerpt(payload),
            source,
        }
    }
}

/// Lossy UTF-8 rendering of at most [`PAYLOAD_EXCERPT_LIMIT`] bytes
pub fn payload_excerpt(payload: &[u8]) -> String {
    if payload.len() <= PAYLOAD_EXCERPT_LIMIT {
        String::from_utf8_lossy(payload).into_owned()
    } else {
        format!(
            "{}...[{} bytes]",
            String::from_utf8_lossy(&payload[..PAYLOAD_EXCERPT_LIMIT]),
            payload.len()
        )
    }
}

/// Decode a JSON payload, attaching topic and excerpt on failure
pub fn decode_payload<T: for<'de> Deserialize<'de>>(
    topic: &str,
    payload: &[u8],
) -> Result<T, PayloadError> {
    serde_json::from_slice(payload).map_err(|e| PayloadError::new(topic, payload, e))
}

/// Bot lifecycle state reported on `{root}/{worker}/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Running,
    Stopped,
    Error,
    Starting,
    Paused,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Running => "running",
            BotStatus::Stopped => "stopped",
            BotStatus::Error => "error",
            BotStatus::Starting => "starting",
            BotStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: BotStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub total: Option<f64>,
    pub available: Option<f64>,
    pub locked: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlReport {
    pub total: Option<f64>,
    pub total_pct: Option<f64>,
    pub realized: Option<f64>,
    pub unrealized: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrdersReport {
    pub active: Option<u64>,
    pub filled_24h: Option<u64>,
    pub cancelled_24h: Option<u64>,
    pub volume_24h: Option<f64>,
}

/// `{root}/{worker}/metrics`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsPayload {
    pub timestamp: Option<DateTime<Utc>>,
    pub balance: Option<BalanceReport>,
    pub pnl: Option<PnlReport>,
    pub orders: Option<OrdersReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Failed,
}

/// `{root}/{worker}/orders/{order_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub exchange_order_id: Option<String>,
    pub trading_pair: String,
    pub order_type: OrderType,
    pub order_side: OrderSide,
    pub price: Option<f64>,
    pub quantity: Option<f64>,
    pub filled_quantity: Option<f64>,
    pub status: OrderStatus,
    pub exchange_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// `{root}/{worker}/logs/{level}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}
