//! Health check HTTP server for container orchestration
//!
//! Exposes the bridge's health to operators and orchestrators:
//!
//! - `GET /health`: every registered check; 200 when all pass, 503 otherwise
//! - `GET /ready`: 200 while the broker connection is healthy
//! - `GET /live`: always 200 while the process serves requests
//! - `GET /metrics`: [`MetricsSnapshot`](super::metrics::MetricsSnapshot) as JSON

use crate::bridge::StatusReporter;
use crate::error::BridgeError;
use crate::health::{overall_health, HealthCheckManager, HealthCheckResult};
use crate::observability::metrics::BridgeMetrics;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    service_id: String,
    port: u16,
    checks: Arc<HealthCheckManager>,
    status: StatusReporter,
    metrics: Arc<BridgeMetrics>,
}

impl HealthServer {
    pub fn new(
        service_id: impl Into<String>,
        port: u16,
        checks: Arc<HealthCheckManager>,
        status: StatusReporter,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            service_id: service_id.into(),
            port,
            checks,
            status,
            metrics,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// All routes, with CORS open to any origin
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let metrics_server = self.clone();
        let ready_server = self.clone();

        // GET /health - comprehensive health status
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.get_health_status().await;
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&status),
                        code,
                    ))
                }
            });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = metrics_server.clone();
                async move { Ok::<_, Infallible>(warp::reply::json(&server.metrics.snapshot())) }
            });

        // GET /ready - readiness probe
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = ready_server.clone();
                async move {
                    let ready = server.status.is_healthy();
                    let response = ReadinessResponse {
                        ready,
                        timestamp: current_timestamp(),
                    };
                    let code = if ready {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&response),
                        code,
                    ))
                }
            });

        // GET /live - liveness probe
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints: HashMap<&str, &str> = [
                ("/health", "Overall health status with detailed checks"),
                ("/metrics", "Bridge metrics and statistics"),
                ("/ready", "Readiness probe"),
                ("/live", "Liveness probe"),
            ]
            .into_iter()
            .collect();
            warp::reply::json(&ApiDocumentationResponse { endpoints })
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
            .with(warp::cors().allow_any_origin())
    }

    /// Bind and serve until `shutdown` resolves
    pub async fn start(
        self: Arc<Self>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), BridgeError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let (bound, server) = warp::serve(self.routes())
            .try_bind_with_graceful_shutdown(addr, shutdown)
            .map_err(|e| BridgeError::health_server(format!("Failed to bind {addr}: {e}")))?;

        tracing::info!(addr = %bound, "Health server listening");
        server.await;
        tracing::info!("Health server stopped");
        Ok(())
    }

    async fn get_health_status(&self) -> HealthStatus {
        let checks = self.checks.run_health_checks().await;
        let status = if overall_health(&checks) {
            "healthy"
        } else {
            "unhealthy"
        };

        HealthStatus {
            status: status.to_string(),
            timestamp: current_timestamp(),
            service_id: self.service_id.clone(),
            uptime_seconds: self.metrics.snapshot().uptime_seconds,
            checks,
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    service_id: String,
    uptime_seconds: u64,
    checks: Vec<HealthCheckResult>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<&'static str, &'static str>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ConnectionManager, ConnectionSettings};
    use crate::health::BridgeHealthCheck;
    use crate::testing::mocks::MockTransport;

    fn server(transport: &MockTransport) -> (Arc<HealthServer>, ConnectionManager) {
        let metrics = Arc::new(BridgeMetrics::new());
        let manager = ConnectionManager::new(
            Arc::new(transport.clone()),
            ConnectionSettings::default(),
            metrics.clone(),
        );
        let mut checks = HealthCheckManager::new();
        checks.add_health_check(Box::new(BridgeHealthCheck::new(manager.status_reporter())));

        let server = HealthServer::new(
            "botbridge-test",
            8080,
            Arc::new(checks),
            manager.status_reporter(),
            metrics,
        );
        (Arc::new(server), manager)
    }

    #[tokio::test]
    async fn test_health_reports_503_until_connected() {
        let transport = MockTransport::new();
        let (server, manager) = server(&transport);
        let routes = server.routes();

        let response = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        manager.ensure_connected().await.unwrap();
        let response = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service_id"], "botbridge-test");
        assert_eq!(body["checks"][0]["details"]["connected"], true);
    }

    #[tokio::test]
    async fn test_ready_follows_connection() {
        let transport = MockTransport::new();
        let (server, manager) = server(&transport);
        let routes = server.routes();

        let response = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        manager.ensure_connected().await.unwrap();
        let response = warp::test::request().path("/ready").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_live_and_metrics() {
        let transport = MockTransport::new();
        let (server, _manager) = server(&transport);
        let routes = server.routes();

        let response = warp::test::request().path("/live").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = warp::test::request().path("/metrics").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["commands"]["published_total"].is_u64());
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let transport = MockTransport::new();
        let (server, _manager) = server(&transport);

        let response = warp::test::request()
            .path("/nope")
            .reply(&server.routes())
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
