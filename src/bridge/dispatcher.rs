//! Fan-out of inbound messages to local callbacks

use super::registry::SubscriptionRegistry;
use crate::observability::metrics::BridgeMetrics;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Outcome of dispatching one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invoked: usize,
    pub failed: usize,
}

/// Invokes every callback whose pattern matches a message
///
/// Callbacks are snapshotted and the registry lock released before any of them
/// runs, so a callback may subscribe or unsubscribe freely. An error or panic
/// in one callback is logged and counted; the remaining callbacks still run.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<BridgeMetrics>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>, metrics: Arc<BridgeMetrics>) -> Self {
        Self { registry, metrics }
    }

    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        self.metrics.message_received();
        let matched = self.registry.matching(topic);
        if matched.is_empty() {
            debug!(topic = %topic, "No subscriber for inbound message");
            return DispatchOutcome::default();
        }

        let mut outcome = DispatchOutcome::default();
        for entry in matched {
            outcome.invoked += 1;
            self.metrics.callback_invoked();
            trace!(pattern = %entry.pattern, topic = %topic, callback = %entry.id, "Invoking callback");

            let failure = match catch_unwind(AssertUnwindSafe(|| (entry.callback)(topic, payload))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            if let Some(reason) = failure {
                outcome.failed += 1;
                self.metrics.callback_failed();
                error!(
                    pattern = %entry.pattern,
                    topic = %topic,
                    callback = %entry.id,
                    error = %reason,
                    "Subscriber callback failed"
                );
            }
        }
        outcome
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::registry::{Callback, CallbackError};
    use crate::protocol::TopicPattern;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn setup() -> (Arc<SubscriptionRegistry>, Arc<BridgeMetrics>, EventDispatcher) {
        let registry = Arc::new(SubscriptionRegistry::new());
        let metrics = Arc::new(BridgeMetrics::new());
        let dispatcher = EventDispatcher::new(registry.clone(), metrics.clone());
        (registry, metrics, dispatcher)
    }

    fn counting(counter: Arc<AtomicUsize>) -> Callback {
        Arc::new(move |_: &str, _: &[u8]| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_every_matching_callback_runs_once() {
        let (registry, _, dispatcher) = setup();
        let wildcard = Arc::new(AtomicUsize::new(0));
        let exact = Arc::new(AtomicUsize::new(0));
        let other = Arc::new(AtomicUsize::new(0));
        registry.add(&TopicPattern::parse("hbot/+/status").unwrap(), counting(wildcard.clone()));
        registry.add(&TopicPattern::parse("hbot/abc/status").unwrap(), counting(exact.clone()));
        registry.add(&TopicPattern::parse("hbot/+/metrics").unwrap(), counting(other.clone()));

        let outcome = dispatcher.dispatch("hbot/abc/status", br#"{"status":"running"}"#);
        assert_eq!(outcome, DispatchOutcome { invoked: 2, failed: 0 });
        assert_eq!(wildcard.load(Ordering::SeqCst), 1);
        assert_eq!(exact.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_and_panicking_callbacks_are_isolated() {
        let (registry, metrics, dispatcher) = setup();
        let survivor = Arc::new(AtomicUsize::new(0));
        let pattern = TopicPattern::parse("hbot/#").unwrap();

        registry.add(
            &pattern,
            Arc::new(|_: &str, _: &[u8]| Err(CallbackError::msg("bad payload"))),
        );
        registry.add(
            &pattern,
            Arc::new(|_: &str, _: &[u8]| -> Result<(), CallbackError> { panic!("boom") }),
        );
        registry.add(&pattern, counting(survivor.clone()));

        let outcome = dispatcher.dispatch("hbot/abc/logs/error", b"{}");
        assert_eq!(outcome, DispatchOutcome { invoked: 3, failed: 2 });
        assert_eq!(survivor.load(Ordering::SeqCst), 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.inbound.messages_received, 1);
        assert_eq!(snapshot.inbound.callback_failures, 2);
    }

    #[test]
    fn test_callback_receives_raw_topic_and_payload() {
        let (registry, _, dispatcher) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.add(
            &TopicPattern::parse("hbot/+/orders/+").unwrap(),
            Arc::new(move |topic: &str, payload: &[u8]| {
                sink.lock().unwrap().push((topic.to_string(), payload.to_vec()));
                Ok(())
            }),
        );

        dispatcher.dispatch("hbot/w1/orders/42", b"raw");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("hbot/w1/orders/42".to_string(), b"raw".to_vec())]
        );
    }

    #[test]
    fn test_callback_may_unsubscribe_itself() {
        let (registry, _, dispatcher) = setup();
        let pattern = TopicPattern::parse("a/b").unwrap();
        let reg = registry.clone();
        registry.add(
            &pattern,
            Arc::new(move |_: &str, _: &[u8]| {
                reg.remove("a/b", None);
                Ok(())
            }),
        );

        assert_eq!(dispatcher.dispatch("a/b", b"").invoked, 1);
        assert!(!registry.contains("a/b"));
        assert_eq!(dispatcher.dispatch("a/b", b"").invoked, 0);
    }

    #[test]
    fn test_unmatched_message() {
        let (_, metrics, dispatcher) = setup();
        assert_eq!(dispatcher.dispatch("nobody/listens", b""), DispatchOutcome::default());
        assert_eq!(metrics.snapshot().inbound.messages_received, 1);
    }
}
