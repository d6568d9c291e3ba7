//! Impure I/O for MQTT sessions
//!
//! Each [`MqttTransport::connect`] call builds a fresh `rumqttc` client and
//! event loop, drives the loop until the broker's CONNACK, then hands the loop
//! to a task that forwards inbound messages and resolves acknowledgement
//! waiters. The task ends with a single [`TransportEvent::Closed`] when the
//! connection drops; it never reconnects.

use super::connection::configure_mqtt_options;
use super::message_handler::{route_mqtt_event, AckResult, EventRoute, PendingAcks};
use crate::config::BrokerSection;
use crate::transport::{Session, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

/// Capacity of the request channel between `AsyncClient` and its event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Outstanding publish and subscribe acknowledgements of one session
#[derive(Debug, Default)]
struct SessionAcks {
    publishes: PendingAcks,
    subscribes: PendingAcks,
}

type SharedAcks = Arc<std::sync::Mutex<SessionAcks>>;

/// Production transport backed by `rumqttc`
#[derive(Debug, Clone)]
pub struct MqttTransport {
    config: BrokerSection,
}

impl MqttTransport {
    pub fn new(config: BrokerSection) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrokerSection {
        &self.config
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(
        &self,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn Session>, TransportError> {
        let options = configure_mqtt_options(&self.config)?;
        let client_id = options.client_id();
        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        debug!(client_id = %client_id, broker_url = %self.config.broker_url, "Opening MQTT session");
        wait_for_connack(&mut event_loop).await?;
        info!(client_id = %client_id, "MQTT session established");

        let acks: SharedAcks = Arc::default();
        let closing = Arc::new(AtomicBool::new(false));
        tokio::spawn(run_event_loop(
            event_loop,
            acks.clone(),
            events,
            closing.clone(),
        ));

        Ok(Arc::new(MqttSession {
            client,
            request_lock: Mutex::new(()),
            acks,
            ack_timeout: self.config.ack_timeout(),
            closing,
        }))
    }
}

/// Poll until the broker accepts or refuses the connection
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match event_loop.poll().await {
            Ok(event) => match route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged => return Ok(()),
                EventRoute::ConnectionRefused(code) => {
                    return Err(TransportError::ConnectionRefused(code))
                }
                _ => continue,
            },
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(TransportError::ConnectionRefused(format!("{code:?}")))
            }
            Err(e) => return Err(TransportError::ConnectionFailed(e.to_string())),
        }
    }
}

/// Drive the event loop of a live session until the connection ends
async fn run_event_loop(
    mut event_loop: EventLoop,
    acks: SharedAcks,
    events: mpsc::Sender<TransportEvent>,
    closing: Arc<AtomicBool>,
) {
    let reason = loop {
        let event = match event_loop.poll().await {
            Ok(event) => event,
            Err(e) if closing.load(Ordering::SeqCst) => {
                debug!(error = %e, "Event loop ended after local disconnect");
                break "disconnected by client".to_string();
            }
            Err(e) => break e.to_string(),
        };

        match route_mqtt_event(&event) {
            EventRoute::MessageReceived { topic, payload } => {
                if events
                    .send(TransportEvent::Message { topic, payload })
                    .await
                    .is_err()
                {
                    break "event receiver dropped".to_string();
                }
            }
            EventRoute::PublishSent(pkid) => lock_acks(&acks).publishes.bind(pkid),
            EventRoute::SubscribeSent(pkid) => lock_acks(&acks).subscribes.bind(pkid),
            EventRoute::PublishAcknowledged(pkid) => {
                if !lock_acks(&acks).publishes.resolve(pkid, Ok(())) {
                    debug!(pkid, "PUBACK without a waiter");
                }
            }
            EventRoute::SubscriptionAcknowledged { pkid, accepted } => {
                let result = if accepted {
                    Ok(())
                } else {
                    Err("rejected by broker".to_string())
                };
                lock_acks(&acks).subscribes.resolve(pkid, result);
            }
            EventRoute::Disconnected => break "broker sent DISCONNECT".to_string(),
            EventRoute::DisconnectSent => break "disconnected by client".to_string(),
            EventRoute::ConnectionAcknowledged
            | EventRoute::ConnectionRefused(_)
            | EventRoute::Other => {}
        }
    };

    {
        let mut pending = lock_acks(&acks);
        pending.publishes.fail_all(&reason);
        pending.subscribes.fail_all(&reason);
    }

    if !closing.load(Ordering::SeqCst) {
        warn!(reason = %reason, "MQTT session closed");
    }
    let _ = events.send(TransportEvent::Closed { reason }).await;
}

fn lock_acks(acks: &SharedAcks) -> std::sync::MutexGuard<'_, SessionAcks> {
    // A poisoned lock only means a waiter panicked; the bookkeeping is intact.
    acks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One live `rumqttc` connection
pub struct MqttSession {
    client: AsyncClient,
    /// Keeps "queue a waiter, then queue the request" atomic across callers
    request_lock: Mutex<()>,
    acks: SharedAcks,
    ack_timeout: Duration,
    closing: Arc<AtomicBool>,
}

impl MqttSession {
    async fn await_ack(
        &self,
        waiter: oneshot::Receiver<AckResult>,
        target: &str,
        on_reject: impl FnOnce(String) -> TransportError,
    ) -> Result<(), TransportError> {
        match tokio::time::timeout(self.ack_timeout, waiter).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(on_reject(reason)),
            Ok(Err(_)) => Err(TransportError::SessionClosed),
            Err(_) => Err(TransportError::AckTimeout {
                target: target.to_string(),
                timeout_ms: self.ack_timeout.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let waiter = {
            let _guard = self.request_lock.lock().await;
            let waiter = lock_acks(&self.acks).publishes.enqueue();
            if let Err(e) = self
                .client
                .publish(topic, QoS::AtLeastOnce, false, payload)
                .await
            {
                lock_acks(&self.acks).publishes.discard_newest();
                return Err(TransportError::PublishFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
            }
            waiter
        };

        self.await_ack(waiter, topic, |reason| TransportError::PublishFailed {
            topic: topic.to_string(),
            reason,
        })
        .await
    }

    async fn subscribe(&self, pattern: &str) -> Result<(), TransportError> {
        let waiter = {
            let _guard = self.request_lock.lock().await;
            let waiter = lock_acks(&self.acks).subscribes.enqueue();
            if let Err(e) = self.client.subscribe(pattern, QoS::AtLeastOnce).await {
                lock_acks(&self.acks).subscribes.discard_newest();
                return Err(TransportError::SubscriptionFailed {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                });
            }
            waiter
        };

        self.await_ack(waiter, pattern, |reason| TransportError::SubscriptionFailed {
            pattern: pattern.to_string(),
            reason,
        })
        .await
    }

    async fn unsubscribe(&self, pattern: &str) -> Result<(), TransportError> {
        self.client
            .unsubscribe(pattern)
            .await
            .map_err(|e| TransportError::SubscriptionFailed {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}
