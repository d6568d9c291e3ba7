//! Mock implementations for testing
//!
//! [`MockTransport`] stands in for the broker: it hands out [`MockSession`]s,
//! records every publish, tracks wire subscriptions per session and lets a
//! test drop the connection or inject inbound messages. [`RecordingStore`]
//! captures what telemetry ingestion forwards.

use crate::ingest::{IngestError, StatusStore, TelemetryRecord, TelemetrySink};
use crate::protocol::{BotStatus, WorkerId};
use crate::transport::{Session, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

pub type PublishedMessage = (String, Vec<u8>);

#[derive(Default)]
struct MockState {
    fail_connect: Option<TransportError>,
    connect_delay: Duration,
    connect_calls: usize,
    disconnect_calls: usize,
    rejected_topics: HashSet<String>,
    publish_error: Option<TransportError>,
    published: Vec<PublishedMessage>,
    subscribe_calls: Vec<String>,
    next_session_id: u64,
    current: Option<LiveMock>,
}

struct LiveMock {
    id: u64,
    events: mpsc::Sender<TransportEvent>,
    subscriptions: BTreeSet<String>,
}

/// Mock transport for testing; clones share the same simulated broker
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect fails until [`MockTransport::set_fail_connect`] clears it
    pub fn with_failure() -> Self {
        let transport = Self::new();
        transport.set_fail_connect(true);
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect =
            fail.then(|| TransportError::ConnectionFailed("Mock connection failure".to_string()));
    }

    pub fn set_connect_error(&self, error: Option<TransportError>) {
        self.lock().fail_connect = error;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = delay;
    }

    /// Publishes to `topic` fail as if the broker refused them
    pub fn reject_topic(&self, topic: impl Into<String>) {
        self.lock().rejected_topics.insert(topic.into());
    }

    /// Every publish fails with `error` until cleared
    pub fn set_publish_error(&self, error: Option<TransportError>) {
        self.lock().publish_error = error;
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.lock().disconnect_calls
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().published.clone()
    }

    pub fn published_topics(&self) -> Vec<String> {
        self.lock()
            .published
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Payloads published to `topic`, decoded as JSON
    pub fn published_json(&self, topic: &str) -> Vec<serde_json::Value> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }

    pub fn clear_history(&self) {
        let mut state = self.lock();
        state.published.clear();
        state.subscribe_calls.clear();
    }

    /// Every wire subscribe seen, across sessions, in order
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.lock().subscribe_calls.clone()
    }

    /// Wire subscriptions of the live session, sorted
    pub fn active_subscriptions(&self) -> Vec<String> {
        self.lock()
            .current
            .as_ref()
            .map(|live| live.subscriptions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_live_session(&self) -> bool {
        self.lock().current.is_some()
    }

    /// Drop the live session as a network failure would
    pub async fn close_session(&self, reason: &str) -> bool {
        let live = self.lock().current.take();
        match live {
            Some(live) => {
                let _ = live
                    .events
                    .send(TransportEvent::Closed {
                        reason: reason.to_string(),
                    })
                    .await;
                true
            }
            None => false,
        }
    }

    /// Deliver a message on the live session as if the broker routed it
    pub async fn inject(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        let events = self.lock().current.as_ref().map(|live| live.events.clone());
        match events {
            Some(events) => events
                .send(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.into(),
                })
                .await
                .is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn Session>, TransportError> {
        let delay = {
            let mut state = self.lock();
            state.connect_calls += 1;
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if let Some(error) = state.fail_connect.clone() {
            return Err(error);
        }

        state.next_session_id += 1;
        let id = state.next_session_id;
        state.current = Some(LiveMock {
            id,
            events,
            subscriptions: BTreeSet::new(),
        });

        Ok(Arc::new(MockSession {
            id,
            state: self.state.clone(),
        }))
    }
}

/// Session handed out by [`MockTransport`]
pub struct MockSession {
    id: u64,
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live<'a>(&self, state: &'a mut MockState) -> Result<&'a mut LiveMock, TransportError> {
        state
            .current
            .as_mut()
            .filter(|live| live.id == self.id)
            .ok_or(TransportError::SessionClosed)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.lock();
        self.live(&mut state)?;
        if let Some(error) = state.publish_error.clone() {
            return Err(error);
        }
        if state.rejected_topics.contains(topic) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "rejected by mock broker".to_string(),
            });
        }
        state.published.push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        self.live(&mut state)?.subscriptions.insert(pattern.to_string());
        state.subscribe_calls.push(pattern.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        self.live(&mut state)?.subscriptions.remove(pattern);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.disconnect_calls += 1;
        if state.current.as_ref().is_some_and(|live| live.id == self.id) {
            state.current = None;
        }
        Ok(())
    }
}

/// In-memory sink that records everything it receives
#[derive(Clone, Default)]
pub struct RecordingStore {
    records: Arc<Mutex<Vec<TelemetryRecord>>>,
    statuses: Arc<Mutex<Vec<(WorkerId, BotStatus)>>>,
    fail: Arc<std::sync::atomic::AtomicBool>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail, to exercise sink error handling
    pub fn set_fail(&self, fail: bool) {
        self.fail
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<(WorkerId, BotStatus)> {
        self.statuses
            .lock()
            .map(|statuses| statuses.clone())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), IngestError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            Err(IngestError::Store("Mock store failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TelemetrySink for RecordingStore {
    async fn record(&self, record: TelemetryRecord) -> Result<(), IngestError> {
        self.check()?;
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
        Ok(())
    }
}

#[async_trait]
impl StatusStore for RecordingStore {
    async fn update_status(&self, worker_id: &WorkerId, status: BotStatus) -> Result<(), IngestError> {
        self.check()?;
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.push((worker_id.clone(), status));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_connect_and_publish() {
        let transport = MockTransport::new();
        let (tx, _rx) = mpsc::channel(8);
        let session = transport.connect(tx).await.unwrap();

        session.publish("hbot/w1/stop", b"{}".to_vec()).await.unwrap();
        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(transport.published_topics(), vec!["hbot/w1/stop".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_connect_failure() {
        let transport = MockTransport::with_failure();
        let (tx, _rx) = mpsc::channel(8);
        assert!(transport.connect(tx).await.is_err());
        assert_eq!(transport.connect_calls(), 1);
        assert!(!transport.has_live_session());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let transport = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(8);
        let session = transport.connect(tx).await.unwrap();
        session.subscribe("hbot/+/status").await.unwrap();
        assert_eq!(transport.active_subscriptions(), vec!["hbot/+/status".to_string()]);

        assert!(transport.close_session("network down").await);
        assert!(matches!(rx.recv().await, Some(TransportEvent::Closed { .. })));
        assert_eq!(
            session.publish("hbot/w1/stop", vec![]).await,
            Err(TransportError::SessionClosed)
        );
        assert!(transport.active_subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_inject_reaches_session_channel() {
        let transport = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(8);
        let _session = transport.connect(tx).await.unwrap();

        assert!(transport.inject("hbot/w1/status", &b"{}"[..]).await);
        match rx.recv().await {
            Some(TransportEvent::Message { topic, payload }) => {
                assert_eq!(topic, "hbot/w1/status");
                assert_eq!(&payload[..], b"{}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_topic() {
        let transport = MockTransport::new();
        transport.reject_topic("hbot/w1/start");
        let (tx, _rx) = mpsc::channel(8);
        let session = transport.connect(tx).await.unwrap();

        assert!(matches!(
            session.publish("hbot/w1/start", vec![]).await,
            Err(TransportError::PublishFailed { .. })
        ));
        assert!(session.publish("hbot/w1/stop", vec![]).await.is_ok());
    }
}
