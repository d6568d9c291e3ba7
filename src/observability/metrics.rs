//! Thread-safe bridge metrics
//!
//! Atomic counters for the hot paths (dispatch, publish) and a small
//! mutex-protected window of publish latencies. One [`BridgeMetrics`] is created
//! per bridge and shared by handle; there is no process-wide instance.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Number of publish latencies kept for percentiles
const LATENCY_WINDOW: usize = 1000;

/// Counters shared by the bridge components
pub struct BridgeMetrics {
    // Connection
    connected: AtomicBool,
    connect_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    reconnect_attempts: AtomicU64,
    reconnects_exhausted: AtomicU64,
    connection_start_time: AtomicU64,

    // Commands
    commands_published: Mutex<HashMap<String, u64>>,
    publish_failures: AtomicU64,
    publish_latencies: Mutex<Vec<u64>>, // milliseconds

    // Inbound
    messages_received: AtomicU64,
    callbacks_invoked: AtomicU64,
    callback_failures: AtomicU64,

    // Telemetry ingestion
    telemetry_ingested: AtomicU64,
    telemetry_dropped: AtomicU64,
    malformed_payloads: AtomicU64,
    sink_failures: AtomicU64,

    uptime_start: AtomicU64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            reconnects_exhausted: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            commands_published: Mutex::new(HashMap::new()),
            publish_failures: AtomicU64::new(0),
            publish_latencies: Mutex::new(Vec::new()),
            messages_received: AtomicU64::new(0),
            callbacks_invoked: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            telemetry_ingested: AtomicU64::new(0),
            telemetry_dropped: AtomicU64::new(0),
            malformed_payloads: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection
    pub fn connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_exhausted(&self) {
        self.reconnects_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    // Commands
    pub fn command_published(&self, kind: &str, latency: Duration) {
        if let Ok(mut counts) = self.commands_published.lock() {
            *counts.entry(kind.to_string()).or_insert(0) += 1;
        }
        if let Ok(mut latencies) = self.publish_latencies.lock() {
            latencies.push(latency.as_millis() as u64);
            if latencies.len() > LATENCY_WINDOW {
                latencies.remove(0);
            }
        }
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Inbound
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_invoked(&self) {
        self.callbacks_invoked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_failed(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Telemetry
    pub fn telemetry_ingested(&self) {
        self.telemetry_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_dropped(&self) {
        self.telemetry_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_payload(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sink_failed(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn latency_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(latencies) = self.publish_latencies.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if latencies.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    fn connection_duration(&self, now: u64) -> u64 {
        if !self.connected.load(Ordering::Relaxed) {
            return 0;
        }
        let start = self.connection_start_time.load(Ordering::Relaxed);
        if start > 0 {
            now.saturating_sub(start)
        } else {
            0
        }
    }

    /// Consistent-enough snapshot for the `/metrics` endpoint
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.latency_statistics();
        let by_kind = self
            .commands_published
            .lock()
            .map(|counts| counts.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
                reconnects_exhausted: self.reconnects_exhausted.load(Ordering::Relaxed),
                connection_duration_seconds: self.connection_duration(now),
            },
            commands: CommandMetrics {
                published_total: by_kind.values().sum(),
                published_by_kind: by_kind,
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                avg_ack_time_ms: avg,
                ack_time_p50_ms: p50,
                ack_time_p95_ms: p95,
                ack_time_p99_ms: p99,
            },
            inbound: InboundMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                callbacks_invoked: self.callbacks_invoked.load(Ordering::Relaxed),
                callback_failures: self.callback_failures.load(Ordering::Relaxed),
            },
            telemetry: TelemetryMetrics {
                ingested: self.telemetry_ingested.load(Ordering::Relaxed),
                dropped: self.telemetry_dropped.load(Ordering::Relaxed),
                malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
                sink_failures: self.sink_failures.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub commands: CommandMetrics,
    pub inbound: InboundMetrics,
    pub telemetry: TelemetryMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub reconnect_attempts: u64,
    pub reconnects_exhausted: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandMetrics {
    pub published_total: u64,
    pub published_by_kind: HashMap<String, u64>,
    pub publish_failures: u64,
    pub avg_ack_time_ms: f64,
    pub ack_time_p50_ms: f64,
    pub ack_time_p95_ms: f64,
    pub ack_time_p99_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboundMetrics {
    pub messages_received: u64,
    pub callbacks_invoked: u64,
    pub callback_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryMetrics {
    pub ingested: u64,
    pub dropped: u64,
    pub malformed_payloads: u64,
    pub sink_failures: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_connection_metrics() {
        let metrics = BridgeMetrics::new();
        metrics.connect_attempt();
        metrics.connection_established();

        let snapshot = metrics.snapshot();
        assert!(snapshot.connection.connected);
        assert_eq!(snapshot.connection.connect_attempts, 1);
        assert_eq!(snapshot.connection.connections_established, 1);

        metrics.connection_lost();
        metrics.reconnect_attempt();
        metrics.reconnect_attempt();
        metrics.reconnect_exhausted();

        let snapshot = metrics.snapshot();
        assert!(!snapshot.connection.connected);
        assert_eq!(snapshot.connection.connections_lost, 1);
        assert_eq!(snapshot.connection.reconnect_attempts, 2);
        assert_eq!(snapshot.connection.reconnects_exhausted, 1);
        assert_eq!(snapshot.connection.connection_duration_seconds, 0);
    }

    #[test]
    fn test_command_counts_by_kind() {
        let metrics = BridgeMetrics::new();
        metrics.command_published("start", Duration::from_millis(12));
        metrics.command_published("start", Duration::from_millis(8));
        metrics.command_published("stop", Duration::from_millis(10));
        metrics.publish_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.commands.published_total, 3);
        assert_eq!(snapshot.commands.published_by_kind.get("start"), Some(&2));
        assert_eq!(snapshot.commands.published_by_kind.get("stop"), Some(&1));
        assert_eq!(snapshot.commands.publish_failures, 1);
        assert!((snapshot.commands.avg_ack_time_ms - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let metrics = BridgeMetrics::new();
        for i in 0..1500 {
            metrics.command_published("stop", Duration::from_millis(i));
        }
        assert_eq!(metrics.publish_latencies.lock().unwrap().len(), LATENCY_WINDOW);
        // Only the last 1000 samples (500..1500) remain.
        assert!(metrics.snapshot().commands.ack_time_p50_ms >= 999.0);
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(BridgeMetrics::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.message_received();
                        metrics.callback_failed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.inbound.messages_received, 1000);
        assert_eq!(snapshot.inbound.callback_failures, 1000);
    }

    #[test]
    fn test_percentile_calculation() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert!((percentile(&data, 50.0) - 5.5).abs() < 0.1);
        assert!((percentile(&data, 95.0) - 9.55).abs() < 0.1);
        assert!((percentile(&data, 0.0) - 1.0).abs() < 0.1);
        assert!((percentile(&data, 100.0) - 10.0).abs() < 0.1);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }
}
