//! Per-worker lifecycle status tracking

use super::telemetry::DEFAULT_CHANNEL_CAPACITY;
use super::{IngestError, StatusStore};
use crate::bridge::{Callback, CallbackError, CallbackId, ConnectionManager};
use crate::observability::metrics::BridgeMetrics;
use crate::protocol::{decode_payload, BotStatus, StatusPayload, TopicScheme, WorkerId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type StatusUpdate = (WorkerId, BotStatus);

#[derive(Default)]
struct SyncState {
    tracked: HashMap<WorkerId, CallbackId>,
    worker: Option<JoinHandle<()>>,
    sender: Option<mpsc::Sender<StatusUpdate>>,
}

/// Mirrors `{root}/{worker}/status` into a [`StatusStore`] for tracked workers
///
/// Workers are tracked individually, as they are created, and untracked when
/// deleted. Store writes happen on one background task started by the first
/// [`StatusSync::track`].
pub struct StatusSync {
    manager: ConnectionManager,
    scheme: TopicScheme,
    store: Arc<dyn StatusStore>,
    capacity: usize,
    state: Mutex<SyncState>,
}

impl StatusSync {
    pub fn new(manager: ConnectionManager, scheme: TopicScheme, store: Arc<dyn StatusStore>) -> Self {
        Self::with_capacity(manager, scheme, store, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(
        manager: ConnectionManager,
        scheme: TopicScheme,
        store: Arc<dyn StatusStore>,
        capacity: usize,
    ) -> Self {
        Self {
            manager,
            scheme,
            store,
            capacity: capacity.max(1),
            state: Mutex::new(SyncState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_tracked(&self, worker: &WorkerId) -> bool {
        self.lock().tracked.contains_key(worker)
    }

    pub fn tracked(&self) -> Vec<WorkerId> {
        self.lock().tracked.keys().cloned().collect()
    }

    /// Start mirroring `worker`'s status; `false` if already tracked
    pub async fn track(&self, worker: &WorkerId) -> bool {
        let sender = {
            let mut state = self.lock();
            if state.tracked.contains_key(worker) {
                return false;
            }
            self.sender(&mut state)
        };

        let pattern = self.scheme.worker_status_pattern(worker);
        let callback = status_callback(worker.clone(), sender, self.manager.metrics().clone());
        let id = self.manager.subscribe(&pattern, callback).await;

        let duplicate = {
            let mut state = self.lock();
            match state.tracked.get(worker) {
                // A concurrent track won the race; keep its registration.
                Some(_) => true,
                None => {
                    state.tracked.insert(worker.clone(), id);
                    false
                }
            }
        };
        if duplicate {
            self.manager.unsubscribe(pattern.as_str(), Some(id)).await;
            return false;
        }

        info!(worker_id = %worker, topic = %pattern, "Tracking worker status");
        true
    }

    /// Stop mirroring `worker`'s status; `false` if it was not tracked
    pub async fn untrack(&self, worker: &WorkerId) -> bool {
        let Some(id) = self.lock().tracked.remove(worker) else {
            return false;
        };

        let pattern = self.scheme.worker_status_pattern(worker);
        self.manager.unsubscribe(pattern.as_str(), Some(id)).await;
        info!(worker_id = %worker, "Stopped tracking worker status");
        true
    }

    /// Untrack every worker and stop the store task
    pub async fn shutdown(&self) {
        let (tracked, worker) = {
            let mut state = self.lock();
            state.sender = None;
            (std::mem::take(&mut state.tracked), state.worker.take())
        };

        for (worker_id, id) in tracked {
            let pattern = self.scheme.worker_status_pattern(&worker_id);
            self.manager.unsubscribe(pattern.as_str(), Some(id)).await;
        }
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Status sync task failed");
                }
            }
        }
    }

    fn sender(&self, state: &mut SyncState) -> mpsc::Sender<StatusUpdate> {
        if let Some(sender) = &state.sender {
            return sender.clone();
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        state.worker = Some(tokio::spawn(run_status_worker(rx, self.store.clone())));
        state.sender = Some(tx.clone());
        tx
    }
}

fn status_callback(
    worker: WorkerId,
    tx: mpsc::Sender<StatusUpdate>,
    metrics: Arc<BridgeMetrics>,
) -> Callback {
    Arc::new(move |topic: &str, payload: &[u8]| {
        let status = match decode_payload::<StatusPayload>(topic, payload) {
            Ok(body) => body.status,
            Err(e) => {
                metrics.malformed_payload();
                warn!(topic = %e.topic, payload = %e.excerpt, error = %e.source, "Dropping malformed status payload");
                return Ok(());
            }
        };

        match tx.try_send((worker.clone(), status)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics.telemetry_dropped();
                warn!(worker_id = %worker, %status, "Status queue full, dropping update");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(CallbackError::new(IngestError::Closed))
            }
        }
    })
}

async fn run_status_worker(mut rx: mpsc::Receiver<StatusUpdate>, store: Arc<dyn StatusStore>) {
    while let Some((worker_id, status)) = rx.recv().await {
        match store.update_status(&worker_id, status).await {
            Ok(()) => debug!(worker_id = %worker_id, %status, "Worker status updated"),
            Err(e) => warn!(worker_id = %worker_id, %status, error = %e, "Failed to update worker status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ConnectionSettings;
    use crate::testing::mocks::{MockTransport, RecordingStore};
    use std::time::Duration;

    fn sync(transport: &MockTransport, store: &RecordingStore) -> (StatusSync, ConnectionManager) {
        let manager = ConnectionManager::new(
            Arc::new(transport.clone()),
            ConnectionSettings::default(),
            Arc::new(BridgeMetrics::new()),
        );
        let sync = StatusSync::new(manager.clone(), TopicScheme::default(), Arc::new(store.clone()));
        (sync, manager)
    }

    async fn wait_for_statuses(store: &RecordingStore, count: usize) {
        for _ in 0..100 {
            if store.statuses().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_track_is_idempotent() {
        let transport = MockTransport::new();
        let store = RecordingStore::new();
        let (sync, manager) = sync(&transport, &store);
        let worker = WorkerId::new("w1").unwrap();

        assert!(sync.track(&worker).await);
        assert!(!sync.track(&worker).await);
        assert!(sync.is_tracked(&worker));
        assert_eq!(manager.registry().callback_count("hbot/w1/status"), 1);
    }

    #[tokio::test]
    async fn test_status_forwarded_to_store() {
        let transport = MockTransport::new();
        let store = RecordingStore::new();
        let (sync, manager) = sync(&transport, &store);
        let worker = WorkerId::new("w1").unwrap();

        sync.track(&worker).await;
        manager.ensure_connected().await.unwrap();
        assert!(transport.inject("hbot/w1/status", &br#"{"status":"running"}"#[..]).await);

        wait_for_statuses(&store, 1).await;
        assert_eq!(store.statuses(), vec![(worker, BotStatus::Running)]);
    }

    #[tokio::test]
    async fn test_untrack_removes_subscription() {
        let transport = MockTransport::new();
        let store = RecordingStore::new();
        let (sync, manager) = sync(&transport, &store);
        let worker = WorkerId::new("w1").unwrap();

        sync.track(&worker).await;
        assert!(sync.untrack(&worker).await);
        assert!(!sync.untrack(&worker).await);
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn test_unknown_status_is_dropped() {
        let (tx, mut rx) = mpsc::channel(4);
        let metrics = Arc::new(BridgeMetrics::new());
        let callback = status_callback(WorkerId::new("w1").unwrap(), tx, metrics.clone());

        assert!(callback("hbot/w1/status", br#"{"status":"exploded"}"#).is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(metrics.snapshot().telemetry.malformed_payloads, 1);
    }
}
