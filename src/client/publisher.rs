use serde::Serialize;
use tracing::{error, info};

use crate::broker::{Connection, OutboundMessage, PublishOutcome};
use crate::utils::error::PublishError;

/// Publishes JSON payloads onto a single durable queue.
///
/// Whether a publish waits for a broker ack is a property of the connection:
/// endpoints with `publisher_confirms` set get [`PublishOutcome::Confirmed`]
/// or [`PublishOutcome::Rejected`] back, others fire and forget.
#[derive(Debug, Clone)]
pub struct Publisher {
    queue: String,
}

impl Publisher {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Serializes `payload` and publishes it as a persistent message.
    ///
    /// The queue is declared on every call so a broker restart that lost it
    /// does not swallow messages. Serialization failures leave the connection
    /// untouched; transport failures come back as
    /// [`PublishError::Transport`] and mean the connection is gone.
    pub async fn publish<C, T>(
        &self,
        connection: &mut C,
        sequence: u64,
        payload: &T,
    ) -> Result<OutboundMessage, PublishError>
    where
        C: Connection,
        T: Serialize + Sync + ?Sized,
    {
        let result = self.try_publish(connection, sequence, payload).await;
        match &result {
            Ok(message) => info!(
                message_id = %message.message_id,
                sequence,
                "Message published to queue '{}': {}",
                self.queue,
                message.body_text()
            ),
            Err(err) => error!(sequence, error = %err, "Failed to publish message"),
        }
        result
    }

    async fn try_publish<C, T>(
        &self,
        connection: &mut C,
        sequence: u64,
        payload: &T,
    ) -> Result<OutboundMessage, PublishError>
    where
        C: Connection,
        T: Serialize + Sync + ?Sized,
    {
        let message = OutboundMessage::json(sequence, payload)?;
        connection.declare_queue(&self.queue).await?;

        match connection.publish(&self.queue, &message).await? {
            PublishOutcome::Rejected => Err(PublishError::Rejected {
                message_id: message.message_id,
            }),
            PublishOutcome::Sent | PublishOutcome::Confirmed => Ok(message),
        }
    }
}
