//! Telemetry ingestion from the worker fleet
//!
//! Subscribes through the bridge, decodes worker payloads and forwards typed
//! records to the persistence layer. Persistence is an external collaborator
//! reached only through [`TelemetrySink`] and [`StatusStore`];
//! [`crate::store::MemoryStore`] is the in-process implementation.

pub mod status_sync;
pub mod telemetry;

pub use status_sync::StatusSync;
pub use telemetry::{IngestSettings, TelemetryIngestor};

use crate::protocol::{
    BalanceReport, BotStatus, LogPayload, OrderPayload, OrdersReport, PnlReport, WorkerId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum IngestError {
    #[error("Store error: {0}")]
    Store(String),
    #[error("Ingestion pipeline closed")]
    Closed,
}

/// One periodic metrics sample; a missing timestamp is stamped on arrival
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSample {
    pub worker_id: WorkerId,
    pub timestamp: DateTime<Utc>,
    pub balance: Option<BalanceReport>,
    pub pnl: Option<PnlReport>,
    pub orders: Option<OrdersReport>,
}

/// Order update; `order_id` comes from the topic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRecord {
    pub worker_id: WorkerId,
    pub order_id: String,
    #[serde(flatten)]
    pub order: OrderPayload,
}

/// Log line; `topic_level` is the level segment of the topic, which may
/// disagree with the level in the body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub worker_id: WorkerId,
    pub topic_level: String,
    #[serde(flatten)]
    pub entry: LogPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TelemetryRecord {
    Metrics(MetricsSample),
    Order(OrderRecord),
    Log(LogRecord),
}

impl TelemetryRecord {
    pub fn worker_id(&self) -> &WorkerId {
        match self {
            TelemetryRecord::Metrics(sample) => &sample.worker_id,
            TelemetryRecord::Order(order) => &order.worker_id,
            TelemetryRecord::Log(log) => &log.worker_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryRecord::Metrics(_) => "metrics",
            TelemetryRecord::Order(_) => "order",
            TelemetryRecord::Log(_) => "log",
        }
    }
}

/// Destination for metrics, orders and logs
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, record: TelemetryRecord) -> Result<(), IngestError>;
}

/// Destination for per-worker lifecycle status
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn update_status(&self, worker_id: &WorkerId, status: BotStatus)
        -> Result<(), IngestError>;
}
