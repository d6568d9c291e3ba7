//! Local subscription bookkeeping
//!
//! Maps each subscribed pattern to the callbacks registered for it. The
//! registry is the source of truth for what must be subscribed on the wire, so
//! the connection manager replays [`SubscriptionRegistry::all_patterns`] after
//! every connect.

use crate::protocol::{topic_matches, TopicPattern};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Failure reported by a subscriber callback
#[derive(Debug, Error)]
#[error(transparent)]
pub struct CallbackError(Box<dyn std::error::Error + Send + Sync>);

impl CallbackError {
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Box::new(error))
    }

    pub fn msg<S: Into<String>>(message: S) -> Self {
        let message: String = message.into();
        Self(message.into())
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

impl From<crate::protocol::PayloadError> for CallbackError {
    fn from(error: crate::protocol::PayloadError) -> Self {
        Self::new(error)
    }
}

/// Subscriber callback, invoked with the concrete topic and raw payload
pub type Callback = Arc<dyn Fn(&str, &[u8]) -> Result<(), CallbackError> + Send + Sync>;

/// Handle naming one registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl CallbackId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb-{}", self.0)
    }
}

/// Result of [`SubscriptionRegistry::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Callbacks actually removed
    pub removed: usize,
    /// The pattern has no callbacks left and was deleted
    pub pattern_dropped: bool,
}

/// Callback snapshot taken for one dispatch
#[derive(Clone)]
pub struct MatchedCallback {
    pub pattern: String,
    pub id: CallbackId,
    pub callback: Callback,
}

/// Patterns and their callbacks; a pattern with no callbacks is never kept
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: Mutex<HashMap<String, Vec<(CallbackId, Callback)>>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<(CallbackId, Callback)>>> {
        // Callbacks never run under this lock, so a poisoned map is still consistent.
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `callback`; the flag is true when the pattern is new
    pub fn add(&self, pattern: &TopicPattern, callback: Callback) -> (CallbackId, bool) {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscriptions = self.lock();
        let callbacks = subscriptions.entry(pattern.as_str().to_string()).or_default();
        let is_new = callbacks.is_empty();
        callbacks.push((id, callback));
        (id, is_new)
    }

    /// Remove one callback, or every callback when `id` is `None`
    pub fn remove(&self, pattern: &str, id: Option<CallbackId>) -> Removal {
        let mut subscriptions = self.lock();
        let Some(callbacks) = subscriptions.get_mut(pattern) else {
            return Removal {
                removed: 0,
                pattern_dropped: false,
            };
        };

        let before = callbacks.len();
        match id {
            Some(id) => callbacks.retain(|(existing, _)| *existing != id),
            None => callbacks.clear(),
        }
        let removed = before - callbacks.len();

        let pattern_dropped = callbacks.is_empty();
        if pattern_dropped {
            subscriptions.remove(pattern);
        }

        Removal {
            removed,
            pattern_dropped,
        }
    }

    pub fn all_patterns(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn contains(&self, pattern: &str) -> bool {
        self.lock().contains_key(pattern)
    }

    pub fn callback_count(&self, pattern: &str) -> usize {
        self.lock().get(pattern).map_or(0, Vec::len)
    }

    /// Snapshot every callback whose pattern matches `topic`
    pub fn matching(&self, topic: &str) -> Vec<MatchedCallback> {
        self.lock()
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, topic))
            .flat_map(|(pattern, callbacks)| {
                callbacks.iter().map(move |(id, callback)| MatchedCallback {
                    pattern: pattern.clone(),
                    id: *id,
                    callback: Arc::clone(callback),
                })
            })
            .collect()
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str) -> TopicPattern {
        TopicPattern::parse(p).unwrap()
    }

    fn noop() -> Callback {
        Arc::new(|_: &str, _: &[u8]| Ok(()))
    }

    #[test]
    fn test_add_reports_new_patterns() {
        let registry = SubscriptionRegistry::new();
        let (first, is_new) = registry.add(&pattern("hbot/+/status"), noop());
        assert!(is_new);
        let (second, is_new) = registry.add(&pattern("hbot/+/status"), noop());
        assert!(!is_new);
        assert_ne!(first, second);
        assert_eq!(registry.callback_count("hbot/+/status"), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_one_keeps_pattern_until_empty() {
        let registry = SubscriptionRegistry::new();
        let (a, _) = registry.add(&pattern("a/b"), noop());
        let (b, _) = registry.add(&pattern("a/b"), noop());

        let removal = registry.remove("a/b", Some(a));
        assert_eq!(
            removal,
            Removal {
                removed: 1,
                pattern_dropped: false
            }
        );
        assert!(registry.contains("a/b"));

        let removal = registry.remove("a/b", Some(b));
        assert!(removal.pattern_dropped);
        assert!(!registry.contains("a/b"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_callback_is_noop() {
        let registry = SubscriptionRegistry::new();
        let (a, _) = registry.add(&pattern("a/b"), noop());
        let (other, _) = registry.add(&pattern("c/d"), noop());

        let removal = registry.remove("a/b", Some(other));
        assert_eq!(removal.removed, 0);
        assert!(!removal.pattern_dropped);
        assert_eq!(registry.callback_count("a/b"), 1);

        assert_eq!(registry.remove("x/y", Some(a)).removed, 0);
    }

    #[test]
    fn test_remove_all() {
        let registry = SubscriptionRegistry::new();
        registry.add(&pattern("a/#"), noop());
        registry.add(&pattern("a/#"), noop());

        let removal = registry.remove("a/#", None);
        assert_eq!(removal.removed, 2);
        assert!(removal.pattern_dropped);
        assert!(registry.all_patterns().is_empty());
    }

    #[test]
    fn test_matching_snapshots_callbacks() {
        let registry = SubscriptionRegistry::new();
        registry.add(&pattern("hbot/+/status"), noop());
        registry.add(&pattern("hbot/#"), noop());
        registry.add(&pattern("hbot/abc/metrics"), noop());

        let matched = registry.matching("hbot/abc/status");
        let mut patterns: Vec<_> = matched.iter().map(|m| m.pattern.as_str()).collect();
        patterns.sort_unstable();
        assert_eq!(patterns, vec!["hbot/#", "hbot/+/status"]);

        assert!(registry.matching("other/abc/status").is_empty());
    }

    #[test]
    fn test_all_patterns() {
        let registry = SubscriptionRegistry::new();
        registry.add(&pattern("a"), noop());
        registry.add(&pattern("b/+"), noop());
        let mut patterns = registry.all_patterns();
        patterns.sort();
        assert_eq!(patterns, vec!["a".to_string(), "b/+".to_string()]);
    }
}
