//! The background loop draining the outbox.

use std::time::Duration;

use common::OrderStatusEvent;
use storage::{OutboxMessage, OutboxRepository};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::MessageBus;

/// Timing knobs for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How often the outbox is polled.
    pub poll_interval: Duration,
    /// Age after which a message stuck at `process` is requeued to
    /// `new`. Must be comfortably longer than one poll plus send, or
    /// slow sends will be delivered twice.
    pub requeue_after: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            requeue_after: Duration::from_secs(60),
        }
    }
}

/// Drains pending outbox messages to the bus.
///
/// Each tick first requeues messages a crashed publisher left behind,
/// then claims the `new` batch and sends it. A failed send leaves its
/// message claimed; the reaper returns it to `new` once it ages out, so
/// nothing is ever lost and per-message failures never abort the batch.
pub struct OutboxRelay<S, B> {
    outbox: S,
    bus: B,
    config: RelayConfig,
}

impl<S, B> OutboxRelay<S, B>
where
    S: OutboxRepository + 'static,
    B: MessageBus + 'static,
{
    pub fn new(outbox: S, bus: B, config: RelayConfig) -> Self {
        Self {
            outbox,
            bus,
            config,
        }
    }

    /// Starts the relay as a background task.
    ///
    /// The returned handle stops it cooperatively: an in-flight drain
    /// always runs to completion before the task exits.
    pub fn spawn(self) -> RelayHandle {
        let (shutdown, mut signal) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.poll_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => self.drain_once().await,
                    _ = signal.changed() => break,
                }
            }

            tracing::info!("outbox relay stopped");
        });

        RelayHandle { shutdown, task }
    }

    /// Runs a single poll cycle: reap stuck messages, claim the pending
    /// batch, send each message.
    pub async fn drain_once(&self) {
        match self.outbox.requeue_stuck(self.config.requeue_after).await {
            Ok(0) => {}
            Ok(requeued) => {
                metrics::counter!("outbox_requeued_total").increment(requeued);
                tracing::warn!(requeued, "requeued stuck outbox messages");
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to requeue stuck outbox messages");
            }
        }

        let messages = match self.outbox.claim_new().await {
            Ok(messages) => messages,
            Err(err) => {
                tracing::error!(error = %err, "failed to claim outbox messages");
                return;
            }
        };

        for message in messages {
            self.send_one(&message).await;
        }
    }

    async fn send_one(&self, message: &OutboxMessage) {
        // Reject a payload the consuming side could not reconstruct
        // before it reaches the bus.
        let event: OrderStatusEvent = match serde_json::from_value(message.payload.clone()) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(id = message.id, error = %err, "malformed outbox payload");
                return;
            }
        };

        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(id = message.id, error = %err, "failed to serialize event");
                return;
            }
        };

        match self.bus.send(&message.topic, &message.key, &payload).await {
            Ok((partition, offset)) => {
                if let Err(err) = self.outbox.mark_sent(message.id).await {
                    // The bus accepted the message but the status write
                    // failed; the reaper will resend it later.
                    tracing::error!(id = message.id, error = %err, "failed to mark message sent");
                    return;
                }
                metrics::counter!("outbox_sent_total").increment(1);
                tracing::debug!(id = message.id, partition, offset, "outbox message delivered");
            }
            Err(err) => {
                // The message stays at `process` until the reaper ages
                // it back to `new`.
                tracing::error!(id = message.id, error = %err, "failed to send outbox message");
            }
        }
    }
}

/// Handle for stopping a spawned [`OutboxRelay`].
pub struct RelayHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Signals shutdown and waits for the relay task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
