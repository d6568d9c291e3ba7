//! Testing utilities and mock implementations
//!
//! Lets the bridge and the ingestion layer run without a broker or a database:
//! [`MockTransport`] simulates the broker and [`RecordingStore`] captures
//! what ingestion writes.

pub mod mocks;

pub use mocks::*;
