//! Health check system for production monitoring
//!
//! Provides the [`HealthCheck`] trait and implementations for the bridge
//! connection and the telemetry store. [`HealthCheckManager`] aggregates them
//! for the HTTP health surface.

use crate::bridge::StatusReporter;
use crate::store::MemoryStore;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Health check result
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub component: String,
    pub healthy: bool,
    pub message: Option<String>,
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Trait for components that can be health checked
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Perform health check on this component
    async fn health_check(&self) -> HealthCheckResult;

    /// Get the component name for reporting
    fn component_name(&self) -> &str;
}

/// Broker connection health, read from the bridge status
pub struct BridgeHealthCheck {
    reporter: StatusReporter,
}

impl BridgeHealthCheck {
    pub fn new(reporter: StatusReporter) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl HealthCheck for BridgeHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let status = self.reporter.get_status();
        let healthy = status.is_healthy();
        let response_time_ms = start.elapsed().as_millis() as u64;

        let message = if healthy {
            "Broker connection healthy".to_string()
        } else if status.exhausted {
            format!(
                "Broker unreachable, gave up after {} reconnect attempts",
                status.reconnect_attempts
            )
        } else {
            "Broker not connected".to_string()
        };

        debug!(
            connected = status.connected,
            exhausted = status.exhausted,
            reconnect_attempts = status.reconnect_attempts,
            "Bridge health check"
        );

        HealthCheckResult {
            component: self.component_name().to_string(),
            healthy,
            message: Some(message),
            response_time_ms: Some(response_time_ms),
            details: Some(json!({
                "connected": status.connected,
                "last_error": status.last_error,
                "reconnect_attempts": status.reconnect_attempts,
                "exhausted": status.exhausted,
            })),
        }
    }

    fn component_name(&self) -> &str {
        "bridge"
    }
}

/// In-process store health; reports how much it holds
pub struct StoreHealthCheck {
    store: Arc<MemoryStore>,
}

impl StoreHealthCheck {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthCheck for StoreHealthCheck {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let counts = self.store.counts();
        let response_time_ms = start.elapsed().as_millis() as u64;

        HealthCheckResult {
            component: self.component_name().to_string(),
            healthy: true,
            message: Some(format!("{} workers tracked", counts.workers)),
            response_time_ms: Some(response_time_ms),
            details: serde_json::to_value(counts).ok(),
        }
    }

    fn component_name(&self) -> &str {
        "store"
    }
}

/// Aggregated health check manager
pub struct HealthCheckManager {
    health_checks: Vec<Box<dyn HealthCheck>>,
}

impl HealthCheckManager {
    pub fn new() -> Self {
        Self {
            health_checks: Vec::new(),
        }
    }

    /// Add a health check to the manager
    pub fn add_health_check(&mut self, health_check: Box<dyn HealthCheck>) {
        self.health_checks.push(health_check);
    }

    pub fn len(&self) -> usize {
        self.health_checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.health_checks.is_empty()
    }

    /// Run all health checks and return their results
    pub async fn run_health_checks(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.health_checks.len());

        for health_check in &self.health_checks {
            results.push(health_check.health_check().await);
        }

        results
    }

    /// Overall health: every component must be healthy
    pub async fn calculate_overall_health(&self) -> bool {
        let results = self.run_health_checks().await;
        overall_health(&results)
    }
}

impl Default for HealthCheckManager {
    fn default() -> Self {
        Self::new()
    }
}

/// All results healthy; an empty set counts as healthy
pub fn overall_health(results: &[HealthCheckResult]) -> bool {
    if results.is_empty() {
        warn!("No health checks configured - assuming healthy");
        return true;
    }

    let healthy_count = results.iter().filter(|r| r.healthy).count();
    let overall_healthy = healthy_count == results.len();

    debug!(
        healthy = healthy_count,
        total = results.len(),
        overall_healthy,
        "Overall health check"
    );
    overall_healthy
}
