//! In-process telemetry and status store
//!
//! Used by the daemon when no external persistence is wired in, and by tests.
//! Histories are bounded per kind; the oldest entries are evicted first.

use crate::ingest::{
    IngestError, LogRecord, MetricsSample, OrderRecord, StatusStore, TelemetryRecord,
    TelemetrySink,
};
use crate::protocol::{BotStatus, WorkerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEntry {
    pub status: BotStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    statuses: HashMap<WorkerId, StatusEntry>,
    metrics: VecDeque<MetricsSample>,
    orders: VecDeque<OrderRecord>,
    logs: VecDeque<LogRecord>,
}

/// Record counts, for health reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub workers: usize,
    pub metrics: usize,
    pub orders: usize,
    pub logs: usize,
}

pub struct MemoryStore {
    state: Mutex<StoreState>,
    history_limit: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            history_limit: history_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self, worker: &WorkerId) -> Option<StatusEntry> {
        self.lock().statuses.get(worker).cloned()
    }

    pub fn statuses(&self) -> HashMap<WorkerId, StatusEntry> {
        self.lock().statuses.clone()
    }

    /// Most recent metrics sample of `worker`
    pub fn latest_metrics(&self, worker: &WorkerId) -> Option<MetricsSample> {
        self.lock()
            .metrics
            .iter()
            .rev()
            .find(|sample| &sample.worker_id == worker)
            .cloned()
    }

    pub fn metrics_for(&self, worker: &WorkerId) -> Vec<MetricsSample> {
        self.lock()
            .metrics
            .iter()
            .filter(|sample| &sample.worker_id == worker)
            .cloned()
            .collect()
    }

    pub fn orders_for(&self, worker: &WorkerId) -> Vec<OrderRecord> {
        self.lock()
            .orders
            .iter()
            .filter(|order| &order.worker_id == worker)
            .cloned()
            .collect()
    }

    pub fn logs_for(&self, worker: &WorkerId) -> Vec<LogRecord> {
        self.lock()
            .logs
            .iter()
            .filter(|log| &log.worker_id == worker)
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> StoreCounts {
        let state = self.lock();
        StoreCounts {
            workers: state.statuses.len(),
            metrics: state.metrics.len(),
            orders: state.orders.len(),
            logs: state.logs.len(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, limit: usize) {
    if queue.len() >= limit {
        queue.pop_front();
    }
    queue.push_back(item);
}

#[async_trait]
impl TelemetrySink for MemoryStore {
    async fn record(&self, record: TelemetryRecord) -> Result<(), IngestError> {
        let limit = self.history_limit;
        let mut state = self.lock();
        match record {
            TelemetryRecord::Metrics(sample) => push_bounded(&mut state.metrics, sample, limit),
            TelemetryRecord::Order(order) => push_bounded(&mut state.orders, order, limit),
            TelemetryRecord::Log(log) => push_bounded(&mut state.logs, log, limit),
        }
        Ok(())
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn update_status(&self, worker_id: &WorkerId, status: BotStatus) -> Result<(), IngestError> {
        self.lock().statuses.insert(
            worker_id.clone(),
            StatusEntry {
                status,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}
