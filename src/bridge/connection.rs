//! Ownership of the single broker connection
//!
//! [`ConnectionManager`] is a cheap clonable handle. It guarantees that at most
//! one connect attempt is in flight: concurrent callers of
//! [`ConnectionManager::ensure_connected`] all wait on the same attempt, which
//! runs in its own task so a cancelled caller cannot strand the others.
//!
//! An unexpected close of a live session starts a reconnect supervisor that
//! follows [`ReconnectPolicy`]. When the cap is reached the status is marked
//! exhausted and nothing more happens until someone calls `ensure_connected`
//! again.

use super::dispatcher::EventDispatcher;
use super::reconnect::{ReconnectConfig, ReconnectPolicy, ReconnectionDecision};
use super::registry::{Callback, CallbackId, Removal, SubscriptionRegistry};
use super::status::{ConnectionStatus, StatusReporter};
use crate::config::BridgeConfig;
use crate::observability::metrics::BridgeMetrics;
use crate::protocol::{TopicError, TopicPattern};
use crate::transport::{Session, Transport, TransportError, TransportEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why a connect request failed; every waiter on one attempt gets the same value
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectFailure {
    #[error("Connection attempt timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("Broker connection failed: {0}")]
    Transport(TransportError),
    #[error("Bridge is shutting down")]
    Shutdown,
    #[error("Connection attempt was abandoned")]
    Abandoned,
}

/// Why a publish failed
#[derive(Debug, Error)]
pub enum PublishFailure {
    #[error(transparent)]
    Connect(#[from] ConnectFailure),
    #[error("Broker rejected publish to {topic}: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("No acknowledgement for {topic} within {timeout_ms}ms")]
    AckTimeout { topic: String, timeout_ms: u64 },
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),
}

/// Connection tuning taken from the configuration
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    /// Capacity of the channel between a session and its receive task
    pub event_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig::default(),
            event_buffer: 256,
        }
    }
}

impl ConnectionSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            connect_timeout: config.broker.connect_timeout(),
            reconnect: config.reconnect.to_reconnect_config(),
            ..Default::default()
        }
    }
}

type AttemptResult = Option<Result<(), ConnectFailure>>;

/// How one reconnection cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    Reconnected,
    Exhausted,
    Shutdown,
}

struct LiveSession {
    id: u64,
    session: Arc<dyn Session>,
}

#[derive(Default)]
struct ConnectionState {
    session: Option<LiveSession>,
    in_flight: Option<watch::Receiver<AttemptResult>>,
    next_session_id: u64,
    supervisor_running: bool,
}

struct Inner {
    transport: Arc<dyn Transport>,
    settings: ConnectionSettings,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: EventDispatcher,
    metrics: Arc<BridgeMetrics>,
    status_tx: watch::Sender<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
    state: Mutex<ConnectionState>,
}

/// Owner of the broker connection and its subscriptions
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: ConnectionSettings,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = EventDispatcher::new(registry.clone(), metrics.clone());
        let (status_tx, _) = watch::channel(ConnectionStatus::default());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                registry,
                dispatcher,
                metrics,
                status_tx,
                shutdown_tx,
                state: Mutex::new(ConnectionState::default()),
            }),
        }
    }

    /// Connect if needed, joining an attempt already in flight
    ///
    /// Resolves within the connect timeout. Calling this after the reconnect
    /// cap was hit clears the exhausted flag and the attempt counter.
    pub async fn ensure_connected(&self) -> Result<(), ConnectFailure> {
        if self.inner.is_shutdown() {
            return Err(ConnectFailure::Shutdown);
        }

        self.inner.status_tx.send_if_modified(|status| {
            if status.exhausted {
                status.exhausted = false;
                status.reconnect_attempts = 0;
                true
            } else {
                false
            }
        });

        Inner::join_or_start_attempt(&self.inner).await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().session.is_some()
    }

    /// Register `callback` for `pattern`
    ///
    /// A new pattern is subscribed on the wire right away when a session is
    /// live, otherwise on the next connect. A failed wire subscribe is logged
    /// and retried on the next connect.
    pub async fn subscribe(&self, pattern: &TopicPattern, callback: Callback) -> CallbackId {
        let (id, is_new) = self.inner.registry.add(pattern, callback);
        debug!(pattern = %pattern, callback = %id, is_new, "Registered subscriber");

        if is_new {
            if let Some(session) = self.inner.current_session() {
                if let Err(e) = session.subscribe(pattern.as_str()).await {
                    warn!(pattern = %pattern, error = %e, "Wire subscribe failed, deferring to next connect");
                }
            }
        }
        id
    }

    /// Remove one callback, or all of them when `id` is `None`
    ///
    /// The wire subscription is dropped when the pattern loses its last
    /// callback, and always when `id` is `None`.
    pub async fn unsubscribe(&self, pattern: &str, id: Option<CallbackId>) -> Removal {
        let removal = self.inner.registry.remove(pattern, id);
        debug!(pattern = %pattern, removed = removal.removed, dropped = removal.pattern_dropped, "Removed subscriber");

        if removal.pattern_dropped || id.is_none() {
            if let Some(session) = self.inner.current_session() {
                if let Err(e) = session.unsubscribe(pattern).await {
                    warn!(pattern = %pattern, error = %e, "Wire unsubscribe failed");
                }
                // A callback may have re-registered the pattern meanwhile.
                if self.inner.registry.contains(pattern) {
                    if let Err(e) = session.subscribe(pattern).await {
                        warn!(pattern = %pattern, error = %e, "Wire resubscribe failed");
                    }
                }
            }
        }
        removal
    }

    /// Publish with at-least-once delivery, connecting first if needed
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishFailure> {
        self.ensure_connected().await?;
        let session = self
            .inner
            .current_session()
            .ok_or(PublishFailure::Connect(ConnectFailure::Abandoned))?;

        session
            .publish(topic, payload)
            .await
            .map_err(|e| match e {
                TransportError::AckTimeout { timeout_ms, .. } => PublishFailure::AckTimeout {
                    topic: topic.to_string(),
                    timeout_ms,
                },
                other => PublishFailure::Rejected {
                    topic: topic.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    /// Stop reconnecting and close the session gracefully
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let live = self.inner.lock_state().session.take();

        if let Some(live) = live {
            if let Err(e) = live.session.disconnect().await {
                warn!(error = %e, "Error while disconnecting from broker");
            }
        }

        self.inner.status_tx.send_modify(|status| status.connected = false);
        self.inner.metrics.disconnected();
        info!("Bridge connection shut down");
    }

    pub fn status_reporter(&self) -> StatusReporter {
        StatusReporter::new(self.inner.status_tx.subscribe())
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.inner.metrics
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        // Never held across an await, so a poisoned guard is still consistent.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn current_session(&self) -> Option<Arc<dyn Session>> {
        self.lock_state()
            .session
            .as_ref()
            .map(|live| live.session.clone())
    }

    async fn join_or_start_attempt(this: &Arc<Self>) -> Result<(), ConnectFailure> {
        let mut attempt_rx = {
            let mut state = this.lock_state();
            if state.session.is_some() {
                return Ok(());
            }
            match &state.in_flight {
                Some(rx) => rx.clone(),
                None => {
                    let (done_tx, done_rx) = watch::channel(None);
                    state.in_flight = Some(done_rx.clone());
                    tokio::spawn(Self::run_attempt(this.clone(), done_tx));
                    done_rx
                }
            }
        };

        let outcome = attempt_rx
            .wait_for(Option::is_some)
            .await
            .map(|result| result.clone());
        match outcome {
            Ok(Some(result)) => result,
            _ => Err(ConnectFailure::Abandoned),
        }
    }

    async fn run_attempt(this: Arc<Self>, done_tx: watch::Sender<AttemptResult>) {
        let result = this.connect_once().await;
        this.lock_state().in_flight = None;
        done_tx.send_replace(Some(result));
    }

    async fn connect_once(self: &Arc<Self>) -> Result<(), ConnectFailure> {
        if self.is_shutdown() {
            return Err(ConnectFailure::Shutdown);
        }

        let deadline = Instant::now() + self.settings.connect_timeout;
        self.metrics.connect_attempt();
        let (events_tx, events_rx) = mpsc::channel(self.settings.event_buffer);

        let session =
            match tokio::time::timeout_at(deadline, self.transport.connect(events_tx)).await {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => return self.record_failure(ConnectFailure::Transport(e)),
                Err(_) => {
                    return self.record_failure(ConnectFailure::Timeout {
                        timeout_ms: self.settings.connect_timeout.as_millis() as u64,
                    })
                }
            };

        // `shutdown` sets the flag before it takes the session under this lock.
        let installed = {
            let mut state = self.lock_state();
            if self.is_shutdown() {
                None
            } else {
                state.next_session_id += 1;
                let id = state.next_session_id;
                state.session = Some(LiveSession {
                    id,
                    session: session.clone(),
                });
                Some(id)
            }
        };
        let Some(session_id) = installed else {
            if let Err(e) = session.disconnect().await {
                debug!(error = %e, "Error closing session opened during shutdown");
            }
            return Err(ConnectFailure::Shutdown);
        };

        self.status_tx.send_modify(|status| {
            status.connected = true;
            status.last_error = None;
            status.reconnect_attempts = 0;
            status.exhausted = false;
        });
        self.metrics.connection_established();
        info!(session = session_id, "Connected to broker");

        tokio::spawn(Self::receive_loop(self.clone(), session_id, events_rx));
        self.resubscribe_all(&session, deadline).await;
        Ok(())
    }

    fn record_failure(&self, failure: ConnectFailure) -> Result<(), ConnectFailure> {
        self.metrics.connection_failed();
        self.status_tx.send_modify(|status| {
            status.connected = false;
            status.last_error = Some(failure.to_string());
        });
        warn!(error = %failure, "Broker connection attempt failed");
        Err(failure)
    }

    /// Replay every registered pattern on a fresh session
    ///
    /// Subscribes run concurrently; whatever has not been acknowledged by the
    /// connect deadline keeps going in the background.
    async fn resubscribe_all(&self, session: &Arc<dyn Session>, deadline: Instant) {
        let patterns = self.registry.all_patterns();
        if patterns.is_empty() {
            return;
        }

        let handles: Vec<_> = patterns
            .into_iter()
            .map(|pattern| {
                let session = session.clone();
                tokio::spawn(async move {
                    let result = session.subscribe(&pattern).await;
                    (pattern, result)
                })
            })
            .collect();

        for handle in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok((pattern, Ok(())))) => debug!(pattern = %pattern, "Re-subscribed"),
                Ok(Ok((pattern, Err(e)))) => {
                    error!(pattern = %pattern, error = %e, "Failed to re-subscribe")
                }
                Ok(Err(e)) => error!(error = %e, "Re-subscribe task failed"),
                Err(_) => {
                    warn!("Re-subscription still pending at connect deadline");
                    break;
                }
            }
        }
    }

    async fn receive_loop(
        this: Arc<Self>,
        session_id: u64,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        let reason = loop {
            match events.recv().await {
                Some(TransportEvent::Message { topic, payload }) => {
                    this.dispatcher.dispatch(&topic, &payload);
                }
                Some(TransportEvent::Closed { reason }) => break reason,
                None => break "session event channel closed".to_string(),
            }
        };
        Self::handle_session_closed(&this, session_id, reason);
    }

    fn handle_session_closed(this: &Arc<Self>, session_id: u64, reason: String) {
        let start_supervisor = {
            let mut state = this.lock_state();
            let is_current = state
                .session
                .as_ref()
                .is_some_and(|live| live.id == session_id);
            if !is_current {
                debug!(session = session_id, "Stale session closed");
                return;
            }
            state.session = None;

            let start = !this.is_shutdown() && !state.supervisor_running;
            if start {
                state.supervisor_running = true;
            }
            start
        };

        this.metrics.connection_lost();
        this.status_tx.send_modify(|status| {
            status.connected = false;
            status.last_error = Some(reason.clone());
        });
        warn!(session = session_id, reason = %reason, "Broker connection lost");

        if start_supervisor {
            tokio::spawn(Self::supervise_reconnect(this.clone()));
        }
    }

    async fn supervise_reconnect(this: Arc<Self>) {
        loop {
            let end = this.reconnect_cycle().await;

            let lost_again = {
                let mut state = this.lock_state();
                // The new session may have dropped before this supervisor let go.
                let lost_again = end == CycleEnd::Reconnected
                    && state.session.is_none()
                    && !this.is_shutdown();
                if !lost_again {
                    state.supervisor_running = false;
                }
                lost_again
            };

            if !lost_again {
                return;
            }
            debug!("Connection dropped again right after reconnecting");
        }
    }

    async fn reconnect_cycle(self: &Arc<Self>) -> CycleEnd {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let config = &self.settings.reconnect;
        let mut attempts_made = 0;

        loop {
            if self.lock_state().session.is_some() {
                return CycleEnd::Reconnected;
            }

            let shutdown_requested = *shutdown_rx.borrow();
            match ReconnectPolicy::next(attempts_made, config, shutdown_requested) {
                ReconnectionDecision::AbortShutdownRequested => {
                    info!("Shutdown requested, stopping reconnection");
                    return CycleEnd::Shutdown;
                }
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    self.status_tx.send_modify(|status| status.exhausted = true);
                    self.metrics.reconnect_exhausted();
                    error!(
                        attempts = attempts_made,
                        "Reconnection attempts exhausted, waiting for an explicit connect request"
                    );
                    return CycleEnd::Exhausted;
                }
                ReconnectionDecision::Proceed { attempt, delay_ms } => {
                    debug!(attempt, delay_ms, "Waiting before reconnection attempt");
                    if !interruptible_sleep(&mut shutdown_rx, delay_ms).await {
                        return CycleEnd::Shutdown;
                    }
                    if self.lock_state().session.is_some() {
                        return CycleEnd::Reconnected;
                    }

                    attempts_made = attempt;
                    self.status_tx
                        .send_modify(|status| status.reconnect_attempts = attempt);
                    self.metrics.reconnect_attempt();
                    info!(attempt, max_attempts = config.max_attempts, "Reconnecting to broker");

                    match Self::join_or_start_attempt(self).await {
                        Ok(()) => {
                            info!(attempt, "Reconnected to broker");
                            return CycleEnd::Reconnected;
                        }
                        Err(ConnectFailure::Shutdown) => return CycleEnd::Shutdown,
                        Err(e) => warn!(attempt, error = %e, "Reconnection attempt failed"),
                    }
                }
            }
        }
    }
}

/// Sleep for `delay_ms` unless shutdown is signalled first; false on shutdown
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay_ms: u64) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = shutdown_rx.changed() => {
            if changed.is_err() || *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
