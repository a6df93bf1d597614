use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Connection, Delivery};
use crate::utils::error::{ConnectionError, HandlerError};

/// Application logic run for every delivery. A message is acked only after
/// `handle` returns `Ok`.
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, delivery: &Delivery) -> Result<(), HandlerError>;
}

/// How often a transiently failing message is retried before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeliveryPolicy {
    pub max_attempts: u32,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// What happened to a delivery after the handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    Requeued { attempt: u32 },
    Dropped { attempt: u32 },
}

/// Pulls deliveries one at a time and settles each before taking the next.
#[derive(Debug)]
pub struct Consumer {
    queue: String,
    prefetch: u16,
    policy: RedeliveryPolicy,
    // Handler attempts per message for the current subscription. Entries
    // leave on ack or drop; the map is emptied on every new subscription.
    attempts: HashMap<String, u32>,
}

impl Consumer {
    pub fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            prefetch: 1,
            policy: RedeliveryPolicy::default(),
            attempts: HashMap::new(),
        }
    }

    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn with_redelivery(mut self, policy: RedeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Messages with a failed attempt that are still awaiting redelivery.
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }

    /// Consumes until `shutdown` fires or the connection fails.
    ///
    /// Shutdown is only observed between deliveries, so a delivery that has
    /// been taken is always acked or nacked before this returns `Ok`.
    ///
    /// Attempt counts restart here. Anything unacked on a previous connection
    /// was requeued by the broker, possibly to another consumer, so old
    /// entries would otherwise never be settled.
    pub async fn consume<C, H>(
        &mut self,
        connection: &mut C,
        handler: &mut H,
        shutdown: &CancellationToken,
    ) -> Result<(), ConnectionError>
    where
        C: Connection,
        H: MessageHandler,
    {
        connection.declare_queue(&self.queue).await?;
        connection.subscribe(&self.queue, self.prefetch).await?;
        if !self.attempts.is_empty() {
            debug!(tracked = self.attempts.len(), "Resetting handler attempt counts");
            self.attempts.clear();
        }
        info!(
            prefetch = self.prefetch,
            "Waiting for messages from queue '{}'", self.queue
        );

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Received shutdown signal, stopping consumer");
                    return Ok(());
                }
                delivery = connection.next_delivery() => delivery?,
            };
            self.dispatch(connection, handler, delivery).await?;
        }
    }

    /// Runs the handler for one delivery and acks or nacks it.
    pub async fn dispatch<C, H>(
        &mut self,
        connection: &mut C,
        handler: &mut H,
        delivery: Delivery,
    ) -> Result<Disposition, ConnectionError>
    where
        C: Connection,
        H: MessageHandler,
    {
        let key = delivery.attempt_key();
        let attempt = {
            let count = self.attempts.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let outcome = handler.handle(&delivery).await;
        let tag = delivery.delivery_tag;

        match outcome {
            Ok(()) => {
                connection.ack(tag).await?;
                self.attempts.remove(&key);
                debug!(message_id = %key, attempt, "Message acknowledged");
                Ok(Disposition::Acked)
            }
            Err(err) if err.is_permanent() || attempt >= self.policy.max_attempts => {
                connection.nack(tag, false).await?;
                self.attempts.remove(&key);
                error!(
                    message_id = %key,
                    attempt,
                    error = %err,
                    body = %delivery.body_text(),
                    "Dropping message after {} attempt(s)",
                    attempt
                );
                Ok(Disposition::Dropped { attempt })
            }
            Err(err) => {
                connection.nack(tag, true).await?;
                warn!(
                    message_id = %key,
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    error = %err,
                    "Message handling failed, requeued for redelivery"
                );
                Ok(Disposition::Requeued { attempt })
            }
        }
    }
}
