//! Observability: structured logging, bridge metrics and the HTTP health surface

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{BridgeMetrics, MetricsSnapshot};

pub use logging::bridge_span;
