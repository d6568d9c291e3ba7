//! Pure event routing and acknowledgement bookkeeping for MQTT sessions
//!
//! `rumqttc` hands out packet ids only once a request reaches the event loop,
//! and it processes requests in the order they were queued. [`PendingAcks`]
//! relies on that ordering: waiters are queued when a request is sent, bound to
//! a packet id when the matching outgoing event appears, and resolved when the
//! broker acknowledges that id.

use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

/// Routing decision for one event loop event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Broker refused the connection
    ConnectionRefused(String),
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: bytes::Bytes },
    /// Broker acknowledged a QoS 1 publish
    PublishAcknowledged(u16),
    /// Broker answered a subscribe
    SubscriptionAcknowledged { pkid: u16, accepted: bool },
    /// A queued publish left with this packet id
    PublishSent(u16),
    /// A queued subscribe left with this packet id
    SubscribeSent(u16),
    /// Broker sent DISCONNECT
    Disconnected,
    /// Our own DISCONNECT went out
    DisconnectSent,
    /// Anything else (pings, unsuback, other outgoing traffic)
    Other,
}

/// Map an `rumqttc` event onto a routing decision
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(Packet::ConnAck(connack)) => {
            if connack.code == rumqttc::ConnectReturnCode::Success {
                EventRoute::ConnectionAcknowledged
            } else {
                EventRoute::ConnectionRefused(format!("{:?}", connack.code))
            }
        }
        Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived {
            topic: publish.topic.clone(),
            payload: publish.payload.clone(),
        },
        Event::Incoming(Packet::PubAck(puback)) => EventRoute::PublishAcknowledged(puback.pkid),
        Event::Incoming(Packet::SubAck(suback)) => EventRoute::SubscriptionAcknowledged {
            pkid: suback.pkid,
            accepted: validate_subscription_success(&suback.return_codes),
        },
        Event::Incoming(Packet::Disconnect) => EventRoute::Disconnected,
        Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent(*pkid),
        Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeSent(*pkid),
        Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
        _ => EventRoute::Other,
    }
}

/// True when every return code grants a QoS
pub fn validate_subscription_success(return_codes: &[SubscribeReasonCode]) -> bool {
    return_codes
        .iter()
        .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
}

/// Outcome delivered to an acknowledgement waiter
pub type AckResult = Result<(), String>;

/// FIFO of waiters not yet bound to a packet id, plus waiters in flight
#[derive(Debug, Default)]
pub struct PendingAcks {
    queued: VecDeque<oneshot::Sender<AckResult>>,
    in_flight: HashMap<u16, oneshot::Sender<AckResult>>,
}

impl PendingAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next request of this kind
    pub fn enqueue(&mut self) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        self.queued.push_back(tx);
        rx
    }

    /// Bind the oldest queued waiter to the packet id the event loop assigned
    pub fn bind(&mut self, pkid: u16) {
        if let Some(waiter) = self.queued.pop_front() {
            if let Some(stale) = self.in_flight.insert(pkid, waiter) {
                let _ = stale.send(Err(format!("packet id {pkid} reused before acknowledgement")));
            }
        }
    }

    /// Drop the most recent unbound waiter when its request never reached the
    /// event loop
    pub fn discard_newest(&mut self) {
        self.queued.pop_back();
    }

    /// Resolve the waiter for `pkid`; returns false if nobody was waiting
    pub fn resolve(&mut self, pkid: u16, result: AckResult) -> bool {
        match self.in_flight.remove(&pkid) {
            Some(waiter) => {
                let _ = waiter.send(result);
                true
            }
            None => false,
        }
    }

    /// Fail every waiter, used when the session ends
    pub fn fail_all(&mut self, reason: &str) {
        for waiter in self.queued.drain(..) {
            let _ = waiter.send(Err(reason.to_string()));
        }
        for (_, waiter) in self.in_flight.drain() {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }

    pub fn len(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::{ConnAck, ConnectReturnCode, PubAck, Publish, QoS, SubAck};

    #[test]
    fn test_route_connack() {
        let ok = Event::Incoming(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false)));
        assert_eq!(route_mqtt_event(&ok), EventRoute::ConnectionAcknowledged);

        let refused = Event::Incoming(Packet::ConnAck(ConnAck::new(
            ConnectReturnCode::NotAuthorized,
            false,
        )));
        assert!(matches!(
            route_mqtt_event(&refused),
            EventRoute::ConnectionRefused(_)
        ));
    }

    #[test]
    fn test_route_publish() {
        let publish = Publish::new("hbot/abc/status", QoS::AtLeastOnce, r#"{"status":"running"}"#);
        let route = route_mqtt_event(&Event::Incoming(Packet::Publish(publish)));
        assert_eq!(
            route,
            EventRoute::MessageReceived {
                topic: "hbot/abc/status".to_string(),
                payload: Bytes::from_static(br#"{"status":"running"}"#),
            }
        );
    }

    #[test]
    fn test_route_acks_and_outgoing() {
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::PubAck(PubAck::new(7)))),
            EventRoute::PublishAcknowledged(7)
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::Publish(7))),
            EventRoute::PublishSent(7)
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::Subscribe(3))),
            EventRoute::SubscribeSent(3)
        );
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::Disconnect)),
            EventRoute::Disconnected
        );
        assert_eq!(
            route_mqtt_event(&Event::Outgoing(Outgoing::Disconnect)),
            EventRoute::DisconnectSent
        );
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::PingResp)),
            EventRoute::Other
        );
    }

    #[test]
    fn test_route_suback() {
        let granted = SubAck::new(3, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::SubAck(granted))),
            EventRoute::SubscriptionAcknowledged {
                pkid: 3,
                accepted: true
            }
        );

        let rejected = SubAck::new(4, vec![SubscribeReasonCode::Failure]);
        assert_eq!(
            route_mqtt_event(&Event::Incoming(Packet::SubAck(rejected))),
            EventRoute::SubscriptionAcknowledged {
                pkid: 4,
                accepted: false
            }
        );
    }

    #[tokio::test]
    async fn test_pending_acks_resolve_in_order() {
        let mut acks = PendingAcks::new();
        let first = acks.enqueue();
        let second = acks.enqueue();
        assert_eq!(acks.len(), 2);

        acks.bind(10);
        acks.bind(11);
        assert!(acks.resolve(11, Err("rejected".to_string())));
        assert!(acks.resolve(10, Ok(())));
        assert!(!acks.resolve(12, Ok(())));

        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(second.await.unwrap(), Err("rejected".to_string()));
        assert!(acks.is_empty());
    }

    #[tokio::test]
    async fn test_pending_acks_fail_all() {
        let mut acks = PendingAcks::new();
        let queued = acks.enqueue();
        let bound = acks.enqueue();
        acks.bind(1);

        acks.fail_all("session closed");
        assert_eq!(bound.await.unwrap(), Err("session closed".to_string()));
        assert_eq!(queued.await.unwrap(), Err("session closed".to_string()));
        assert!(acks.is_empty());
    }
}
