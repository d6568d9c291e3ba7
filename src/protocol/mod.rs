//! Wire protocol between the dashboard backend and remote workers
//!
//! Topic namespace, command payloads sent to workers and the telemetry
//! payloads they publish back. All payloads are UTF-8 JSON.

pub mod commands;
pub mod telemetry;
pub mod topics;

pub use commands::*;
pub use telemetry::*;
pub use topics::*;
