//! Command publishing to remote workers

use super::connection::{ConnectionManager, PublishFailure};
use crate::observability::metrics::BridgeMetrics;
use crate::protocol::{Command, CommandEnvelope, StartPayload, StopPayload, TopicScheme, WorkerId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Encodes commands onto the worker topic namespace and publishes them
#[derive(Clone)]
pub struct CommandPublisher {
    manager: ConnectionManager,
    scheme: TopicScheme,
    restart_grace: Duration,
    metrics: Arc<BridgeMetrics>,
}

impl CommandPublisher {
    pub fn new(manager: ConnectionManager, scheme: TopicScheme, restart_grace: Duration) -> Self {
        let metrics = manager.metrics().clone();
        Self {
            manager,
            scheme,
            restart_grace,
            metrics,
        }
    }

    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }

    /// Publish `command` to `worker`, waiting for the broker's acknowledgement
    ///
    /// Restart publishes stop, waits the grace period, then publishes start.
    /// A failed stop fails the restart and start is never sent.
    pub async fn publish(&self, worker: &WorkerId, command: Command) -> Result<(), PublishFailure> {
        let kind = command.kind();
        let result = match command {
            Command::Restart(restart) => self.restart(worker, restart.stop, restart.start).await,
            other => self.publish_single(worker, other).await,
        };

        if let Err(e) = &result {
            warn!(worker_id = %worker, command = %kind, error = %e, "Command publish failed");
        }
        result
    }

    /// Like [`CommandPublisher::publish`] for an unvalidated worker id
    pub async fn publish_to(&self, worker: &str, command: Command) -> Result<(), PublishFailure> {
        let worker = WorkerId::new(worker)?;
        self.publish(&worker, command).await
    }

    pub async fn start(&self, worker: &WorkerId, payload: StartPayload) -> Result<(), PublishFailure> {
        self.publish(worker, Command::Start(payload)).await
    }

    pub async fn stop(&self, worker: &WorkerId, payload: StopPayload) -> Result<(), PublishFailure> {
        self.publish(worker, Command::Stop(payload)).await
    }

    async fn restart(
        &self,
        worker: &WorkerId,
        stop: StopPayload,
        start: StartPayload,
    ) -> Result<(), PublishFailure> {
        info!(worker_id = %worker, "Restarting worker");
        self.publish_single(worker, Command::Stop(stop)).await?;

        debug!(worker_id = %worker, grace_ms = self.restart_grace.as_millis() as u64, "Waiting before start");
        tokio::time::sleep(self.restart_grace).await;

        self.publish_single(worker, Command::Start(start)).await
    }

    async fn publish_single(&self, worker: &WorkerId, command: Command) -> Result<(), PublishFailure> {
        let kind = command.kind();
        let envelope = CommandEnvelope::new(worker.clone(), command);
        let Some(wire) = envelope.encode(&self.scheme)? else {
            // Only restart encodes to nothing, and it never reaches here.
            return Ok(());
        };

        let started = Instant::now();
        match self.manager.publish(&wire.topic, wire.payload).await {
            Ok(()) => {
                self.metrics.command_published(kind.as_str(), started.elapsed());
                info!(worker_id = %worker, command = %kind, topic = %wire.topic, "Command published");
                Ok(())
            }
            Err(e) => {
                self.metrics.publish_failed();
                Err(e)
            }
        }
    }
}
