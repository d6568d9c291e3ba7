//! Topic matching, pattern validation and the worker topic namespace
//!
//! Every wire topic the bridge publishes to or subscribes on is produced by
//! [`TopicScheme`]; inbound topics are parsed back through the same type so the
//! namespace is defined in exactly one place.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Single-level wildcard segment
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
/// Multi-level wildcard segment, only valid as the final segment
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Does `topic` match `pattern`?
///
/// `+` consumes exactly one topic segment. `#` matches one or more remaining
/// segments, so `a/#` matches `a/b` and `a/b/c` but not `a` itself. Without a
/// `#`, both sides must run out of segments at the same time.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (Some(MULTI_LEVEL_WILDCARD), Some(_)) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => continue,
            (Some(expected), Some(actual)) => {
                if expected != actual {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// A validated subscription pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPattern(String);

impl TopicPattern {
    /// Validate a pattern: non-empty, wildcards occupy whole segments and `#`
    /// only appears last.
    pub fn parse(pattern: impl Into<String>) -> Result<Self, TopicError> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(TopicError::EmptyPattern);
        }

        let segments: Vec<&str> = pattern.split('/').collect();
        let last = segments.len() - 1;
        for (index, segment) in segments.iter().enumerate() {
            if *segment == MULTI_LEVEL_WILDCARD {
                if index != last {
                    return Err(TopicError::MisplacedMultiLevelWildcard(pattern.clone()));
                }
            } else if *segment != SINGLE_LEVEL_WILDCARD
                && (segment.contains('+') || segment.contains('#'))
            {
                return Err(TopicError::PartialWildcard(pattern.clone()));
            }
        }

        Ok(Self(pattern))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the pattern contains no wildcard segments
    pub fn is_exact(&self) -> bool {
        !self
            .0
            .split('/')
            .any(|s| s == SINGLE_LEVEL_WILDCARD || s == MULTI_LEVEL_WILDCARD)
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(&self.0, topic)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TopicPattern {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl TryFrom<&str> for TopicPattern {
    type Error = TopicError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TopicPattern> for String {
    fn from(pattern: TopicPattern) -> Self {
        pattern.0
    }
}

/// Identifier of one remote bot process
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Result<Self, TopicError> {
        let id = id.into();
        validate_worker_id(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorkerId {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerId> for String {
    fn from(id: WorkerId) -> Self {
        id.0
    }
}

pub fn validate_worker_id(worker_id: &str) -> Result<(), TopicError> {
    if worker_id.is_empty() {
        return Err(TopicError::EmptyWorkerId);
    }

    for ch in worker_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(TopicError::InvalidWorkerIdChar(ch));
        }
    }

    Ok(())
}

/// Topic and identifier validation errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TopicError {
    #[error("Worker ID cannot be empty")]
    EmptyWorkerId,
    #[error("Worker ID contains invalid character: '{0}'")]
    InvalidWorkerIdChar(char),
    #[error("Topic pattern cannot be empty")]
    EmptyPattern,
    #[error("'#' must be the final segment of pattern '{0}'")]
    MisplacedMultiLevelWildcard(String),
    #[error("Wildcards must occupy a whole segment in pattern '{0}'")]
    PartialWildcard(String),
    #[error("Topic root '{0}' contains wildcards or empty segments")]
    InvalidRoot(String),
}

/// The per-worker channels carried under `{root}/{worker}/...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Start,
    Stop,
    ConfigUpdate,
    Status,
    Metrics,
    Order(String),
    Log(String),
}

/// A concrete topic split back into worker and channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTopic {
    pub worker_id: WorkerId,
    pub channel: Channel,
}

/// Builder and parser for the worker topic namespace
///
/// ```text
/// {root}/{worker}/start
/// {root}/{worker}/stop
/// {root}/{worker}/config/update
/// {root}/{worker}/status
/// {root}/{worker}/metrics
/// {root}/{worker}/orders/{order_id}
/// {root}/{worker}/logs/{level}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    root: String,
}

impl TopicScheme {
    pub fn new(root: impl Into<String>) -> Result<Self, TopicError> {
        let root = root.into();
        // The root is a literal prefix; wildcards would turn publishes into patterns.
        TopicPattern::parse(root.as_str())?;
        if root.contains('+') || root.contains('#') || root.split('/').any(str::is_empty) {
            return Err(TopicError::InvalidRoot(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn start(&self, worker: &WorkerId) -> String {
        format!("{}/{}/start", self.root, worker)
    }

    pub fn stop(&self, worker: &WorkerId) -> String {
        format!("{}/{}/stop", self.root, worker)
    }

    pub fn config_update(&self, worker: &WorkerId) -> String {
        format!("{}/{}/config/update", self.root, worker)
    }

    pub fn status(&self, worker: &WorkerId) -> String {
        format!("{}/{}/status", self.root, worker)
    }

    pub fn metrics(&self, worker: &WorkerId) -> String {
        format!("{}/{}/metrics", self.root, worker)
    }

    pub fn order(&self, worker: &WorkerId, order_id: &str) -> String {
        format!("{}/{}/orders/{}", self.root, worker, order_id)
    }

    pub fn log(&self, worker: &WorkerId, level: &str) -> String {
        format!("{}/{}/logs/{}", self.root, worker, level)
    }

    /// `{root}/{worker}/status`
    pub fn worker_status_pattern(&self, worker: &WorkerId) -> TopicPattern {
        TopicPattern(self.status(worker))
    }

    /// `{root}/+/status`
    pub fn all_status_pattern(&self) -> TopicPattern {
        TopicPattern(format!("{}/+/status", self.root))
    }

    /// `{root}/+/metrics`
    pub fn all_metrics_pattern(&self) -> TopicPattern {
        TopicPattern(format!("{}/+/metrics", self.root))
    }

    /// `{root}/+/orders/+`
    pub fn all_orders_pattern(&self) -> TopicPattern {
        TopicPattern(format!("{}/+/orders/+", self.root))
    }

    /// `{root}/+/logs/+`
    pub fn all_logs_pattern(&self) -> TopicPattern {
        TopicPattern(format!("{}/+/logs/+", self.root))
    }

    /// Split a concrete topic into worker and channel; `None` if it is not in
    /// this namespace.
    pub fn parse(&self, topic: &str) -> Option<ParsedTopic> {
        let rest = topic.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        let mut segments = rest.split('/');
        let worker_id = WorkerId::new(segments.next()?).ok()?;

        let channel = match (segments.next()?, segments.next(), segments.next()) {
            ("start", None, None) => Channel::Start,
            ("stop", None, None) => Channel::Stop,
            ("config", Some("update"), None) => Channel::ConfigUpdate,
            ("status", None, None) => Channel::Status,
            ("metrics", None, None) => Channel::Metrics,
            ("orders", Some(order_id), None) if !order_id.is_empty() => {
                Channel::Order(order_id.to_string())
            }
            ("logs", Some(level), None) if !level.is_empty() => Channel::Log(level.to_string()),
            _ => return None,
        };

        Some(ParsedTopic { worker_id, channel })
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self {
            root: "hbot".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn worker(id: &str) -> WorkerId {
        WorkerId::new(id).unwrap()
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("workers/+/status", "workers/abc/status"));
        assert!(!topic_matches("workers/+/status", "workers/abc/def/status"));
        assert!(!topic_matches("a/+/c", "a/c"));
        assert!(!topic_matches("a/+/c", "a/b/c/d"));
        assert!(topic_matches("a/+/c", "a/b/c"));
    }

    #[test]
    fn test_multi_level_wildcard_requires_a_segment() {
        assert!(topic_matches("workers/#", "workers/abc/def/status"));
        assert!(topic_matches("a/#", "a/b"));
        assert!(topic_matches("a/#", "a/b/c/d"));
        // `#` stands for one or more levels, never zero
        assert!(!topic_matches("workers/#", "workers"));
        assert!(!topic_matches("a/#", "a"));
        assert!(topic_matches("#", "anything/at/all"));
    }

    #[test]
    fn test_exact_patterns() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/x/c"));
    }

    #[test]
    fn test_pattern_validation() {
        assert!(TopicPattern::parse("hbot/+/logs/+").is_ok());
        assert!(TopicPattern::parse("hbot/#").is_ok());
        assert!(TopicPattern::parse("#").is_ok());
        assert_eq!(TopicPattern::parse(""), Err(TopicError::EmptyPattern));
        assert!(matches!(
            TopicPattern::parse("hbot/#/status"),
            Err(TopicError::MisplacedMultiLevelWildcard(_))
        ));
        assert!(matches!(
            TopicPattern::parse("hbot/bot+/status"),
            Err(TopicError::PartialWildcard(_))
        ));
        assert!(matches!(
            TopicPattern::parse("hbot/a#"),
            Err(TopicError::PartialWildcard(_))
        ));
    }

    #[test]
    fn test_pattern_is_exact() {
        assert!(TopicPattern::parse("hbot/abc/status").unwrap().is_exact());
        assert!(!TopicPattern::parse("hbot/+/status").unwrap().is_exact());
    }

    #[test]
    fn test_worker_id_validation() {
        assert!(WorkerId::new("7f3c1a2e-bot").is_ok());
        assert!(WorkerId::new("bot_1.v2").is_ok());
        assert_eq!(WorkerId::new(""), Err(TopicError::EmptyWorkerId));
        assert_eq!(WorkerId::new("a/b"), Err(TopicError::InvalidWorkerIdChar('/')));
        assert_eq!(WorkerId::new("a+"), Err(TopicError::InvalidWorkerIdChar('+')));
        assert_eq!(WorkerId::new("#"), Err(TopicError::InvalidWorkerIdChar('#')));
    }

    #[test]
    fn test_scheme_builds_wire_topics() {
        let scheme = TopicScheme::new("workers").unwrap();
        let id = worker("abc");

        assert_eq!(scheme.start(&id), "workers/abc/start");
        assert_eq!(scheme.stop(&id), "workers/abc/stop");
        assert_eq!(scheme.config_update(&id), "workers/abc/config/update");
        assert_eq!(scheme.status(&id), "workers/abc/status");
        assert_eq!(scheme.metrics(&id), "workers/abc/metrics");
        assert_eq!(scheme.order(&id, "o-1"), "workers/abc/orders/o-1");
        assert_eq!(scheme.log(&id, "error"), "workers/abc/logs/error");
        assert_eq!(scheme.all_orders_pattern().as_str(), "workers/+/orders/+");
    }

    #[test]
    fn test_default_scheme_uses_hbot_root() {
        let scheme = TopicScheme::default();
        assert_eq!(scheme.start(&worker("x")), "hbot/x/start");
    }

    #[test]
    fn test_scheme_rejects_wildcard_root() {
        assert!(TopicScheme::new("hbot/+").is_err());
        assert!(TopicScheme::new("#").is_err());
        assert!(TopicScheme::new("").is_err());
        assert!(TopicScheme::new("hbot/").is_err());
        assert!(TopicScheme::new("fleet/hbot").is_ok());
    }

    #[test]
    fn test_scheme_parses_inbound_topics() {
        let scheme = TopicScheme::default();

        let parsed = scheme.parse("hbot/abc/orders/42").unwrap();
        assert_eq!(parsed.worker_id.as_str(), "abc");
        assert_eq!(parsed.channel, Channel::Order("42".to_string()));

        assert_eq!(
            scheme.parse("hbot/abc/logs/warning").unwrap().channel,
            Channel::Log("warning".to_string())
        );
        assert_eq!(
            scheme.parse("hbot/abc/config/update").unwrap().channel,
            Channel::ConfigUpdate
        );
        assert_eq!(scheme.parse("hbot/abc/status").unwrap().channel, Channel::Status);

        assert!(scheme.parse("other/abc/status").is_none());
        assert!(scheme.parse("hbotx/abc/status").is_none());
        assert!(scheme.parse("hbot/abc/unknown").is_none());
        assert!(scheme.parse("hbot/abc/status/extra").is_none());
        assert!(scheme.parse("hbot/abc/orders").is_none());
    }

    #[test]
    fn test_scheme_round_trips_through_patterns() {
        let scheme = TopicScheme::default();
        let id = worker("bot-9");
        assert!(scheme.all_metrics_pattern().matches(&scheme.metrics(&id)));
        assert!(scheme.all_logs_pattern().matches(&scheme.log(&id, "info")));
        assert!(scheme.worker_status_pattern(&id).matches(&scheme.status(&id)));
        assert!(!scheme.all_status_pattern().matches(&scheme.metrics(&id)));
    }

    proptest! {
        #[test]
        fn exact_pattern_matches_only_itself(topic in "[a-z]{1,5}(/[a-z]{1,5}){0,4}") {
            prop_assert!(topic_matches(&topic, &topic));
            let longer = format!("{topic}/x");
            prop_assert!(!topic_matches(&topic, &longer));
        }

        #[test]
        fn plus_matches_any_single_segment(segment in "[a-zA-Z0-9_-]{1,12}") {
            let topic = format!("hbot/{segment}/status");
            prop_assert!(topic_matches("hbot/+/status", &topic));
        }

        #[test]
        fn hash_matches_every_deeper_topic(tail in "[a-z]{1,5}(/[a-z]{1,5}){0,4}") {
            let topic = format!("hbot/{tail}");
            prop_assert!(topic_matches("hbot/#", &topic));
            prop_assert!(topic_matches("#", &topic));
        }

        #[test]
        fn matching_is_deterministic(pattern in "[a-c+]{1}(/[a-c+]{1}){0,3}", topic in "[a-c]{1}(/[a-c]{1}){0,3}") {
            prop_assert_eq!(topic_matches(&pattern, &topic), topic_matches(&pattern, &topic));
        }
    }
}
