//! Connection health snapshots

use crate::error::sanitize_error_message;
use serde::Serialize;
use tokio::sync::watch;

/// Point-in-time view of the broker connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_error: Option<String>,
    /// Attempts made in the current reconnection cycle
    pub reconnect_attempts: u32,
    /// The reconnect cap was hit; cleared by the next external connect request
    pub exhausted: bool,
}

impl ConnectionStatus {
    pub fn is_healthy(&self) -> bool {
        self.connected && !self.exhausted
    }
}

/// Read-only handle on the connection status
///
/// Backed by a `watch` channel written only by the connection manager, so
/// every read is a consistent snapshot and never blocks.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl StatusReporter {
    pub(crate) fn new(status_rx: watch::Receiver<ConnectionStatus>) -> Self {
        Self { status_rx }
    }

    /// Snapshot with `last_error` sanitized for external display
    pub fn get_status(&self) -> ConnectionStatus {
        let mut status = self.status_rx.borrow().clone();
        status.last_error = status.last_error.as_deref().map(sanitize_error_message);
        status
    }

    pub fn is_healthy(&self) -> bool {
        self.status_rx.borrow().is_healthy()
    }

    /// Wait for the next status change; `None` once the manager is gone
    pub async fn wait_for_change(&mut self) -> Option<ConnectionStatus> {
        self.status_rx.changed().await.ok()?;
        Some(self.get_status())
    }

    /// Wait until `predicate` holds for the current status
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&ConnectionStatus) -> bool,
    ) -> Option<ConnectionStatus> {
        self.status_rx.wait_for(predicate).await.ok()?;
        Some(self.get_status())
    }
}
