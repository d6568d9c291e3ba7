//! Metrics, order and log ingestion across all workers

use super::{IngestError, LogRecord, MetricsSample, OrderRecord, TelemetryRecord, TelemetrySink};
use crate::bridge::{Callback, CallbackError, CallbackId, ConnectionManager};
use crate::observability::metrics::BridgeMetrics;
use crate::protocol::{
    decode_payload, Channel, LogPayload, MetricsPayload, OrderPayload, PayloadError, TopicPattern,
    TopicScheme,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Records buffered between dispatch and the sink
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub channel_capacity: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

struct Running {
    subscriptions: Vec<(TopicPattern, CallbackId)>,
    worker: JoinHandle<()>,
}

/// Subscribes to every worker's metrics, orders and logs and forwards them to
/// a [`TelemetrySink`]
///
/// Callbacks only decode and enqueue; a single worker task performs the sink
/// writes, so a slow store never stalls message dispatch. When the queue is
/// full the record is dropped with a warning.
pub struct TelemetryIngestor {
    manager: ConnectionManager,
    scheme: TopicScheme,
    sink: Arc<dyn TelemetrySink>,
    settings: IngestSettings,
    running: Mutex<Option<Running>>,
}

impl TelemetryIngestor {
    pub fn new(
        manager: ConnectionManager,
        scheme: TopicScheme,
        sink: Arc<dyn TelemetrySink>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            manager,
            scheme,
            sink,
            settings,
            running: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Subscribe the telemetry patterns; a second call is a no-op
    ///
    /// Returns `true` when this call started ingestion.
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Telemetry ingestion already running");
            return false;
        }

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let metrics = self.manager.metrics().clone();
        let worker = tokio::spawn(run_sink_worker(rx, self.sink.clone(), metrics.clone()));

        let patterns = [
            self.scheme.all_metrics_pattern(),
            self.scheme.all_orders_pattern(),
            self.scheme.all_logs_pattern(),
        ];

        let mut subscriptions = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let callback = forwarding_callback(self.scheme.clone(), tx.clone(), metrics.clone());
            let id = self.manager.subscribe(&pattern, callback).await;
            subscriptions.push((pattern, id));
        }

        info!(
            patterns = subscriptions.len(),
            capacity = self.settings.channel_capacity,
            "Telemetry ingestion started"
        );
        *running = Some(Running {
            subscriptions,
            worker,
        });
        true
    }

    /// Remove exactly the callbacks registered by [`TelemetryIngestor::start`]
    /// and let the worker drain what is already queued
    pub async fn stop(&self) {
        let Some(Running {
            subscriptions,
            mut worker,
        }) = self.running.lock().await.take()
        else {
            return;
        };

        for (pattern, id) in subscriptions {
            self.manager.unsubscribe(pattern.as_str(), Some(id)).await;
        }

        // The worker ends once every callback, and with it every sender, is gone.
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut worker).await {
            Ok(Err(e)) if !e.is_cancelled() => error!(error = %e, "Telemetry worker failed"),
            Ok(_) => {}
            Err(_) => {
                warn!("Telemetry worker did not drain in time, aborting");
                worker.abort();
            }
        }
        info!("Telemetry ingestion stopped");
    }
}

fn forwarding_callback(
    scheme: TopicScheme,
    tx: mpsc::Sender<TelemetryRecord>,
    metrics: Arc<BridgeMetrics>,
) -> Callback {
    Arc::new(move |topic: &str, payload: &[u8]| {
        let record = match decode_telemetry(&scheme, topic, payload) {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(topic = %topic, "Ignoring topic outside the telemetry namespace");
                return Ok(());
            }
            Err(e) => {
                metrics.malformed_payload();
                warn!(topic = %e.topic, payload = %e.excerpt, error = %e.source, "Dropping malformed telemetry payload");
                return Ok(());
            }
        };

        match tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(record)) => {
                metrics.telemetry_dropped();
                warn!(
                    topic = %topic,
                    worker_id = %record.worker_id(),
                    kind = record.kind(),
                    "Telemetry queue full, dropping record"
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(CallbackError::new(IngestError::Closed))
            }
        }
    })
}

async fn run_sink_worker(
    mut rx: mpsc::Receiver<TelemetryRecord>,
    sink: Arc<dyn TelemetrySink>,
    metrics: Arc<BridgeMetrics>,
) {
    while let Some(record) = rx.recv().await {
        let worker_id = record.worker_id().clone();
        let kind = record.kind();
        match sink.record(record).await {
            Ok(()) => metrics.telemetry_ingested(),
            Err(e) => {
                metrics.sink_failed();
                warn!(worker_id = %worker_id, kind, error = %e, "Failed to store telemetry record");
            }
        }
    }
    debug!("Telemetry worker exiting");
}

/// Decode one inbound message into a record
///
/// `Ok(None)` for topics that are not metrics, orders or logs of this
/// namespace.
pub fn decode_telemetry(
    scheme: &TopicScheme,
    topic: &str,
    payload: &[u8],
) -> Result<Option<TelemetryRecord>, PayloadError> {
    let Some(parsed) = scheme.parse(topic) else {
        return Ok(None);
    };

    let record = match parsed.channel {
        Channel::Metrics => {
            let body: MetricsPayload = decode_payload(topic, payload)?;
            TelemetryRecord::Metrics(MetricsSample {
                worker_id: parsed.worker_id,
                timestamp: body.timestamp.unwrap_or_else(Utc::now),
                balance: body.balance,
                pnl: body.pnl,
                orders: body.orders,
            })
        }
        Channel::Order(order_id) => {
            let order: OrderPayload = decode_payload(topic, payload)?;
            TelemetryRecord::Order(OrderRecord {
                worker_id: parsed.worker_id,
                order_id,
                order,
            })
        }
        Channel::Log(topic_level) => {
            let entry: LogPayload = decode_payload(topic, payload)?;
            TelemetryRecord::Log(LogRecord {
                worker_id: parsed.worker_id,
                topic_level,
                entry,
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(record))
}
