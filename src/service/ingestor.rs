use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::event::GameEvent;
use crate::broker::Connection;
use crate::client::Publisher;
use crate::connection::Session;
use crate::utils::error::{PipelineError, PublishError};

/// Publishes one placeholder [`GameEvent`] per interval until shutdown.
///
/// The first event goes out as soon as a connection is available. Sequence
/// numbers start at 1 and survive reconnects; a publish lost to a dropped
/// connection is retried with the same sequence number once reconnected.
pub struct IngestorService {
    publisher: Publisher,
    interval: Duration,
    shutdown: CancellationToken,
    next_sequence: u64,
    published: u64,
}

impl IngestorService {
    pub fn new(publisher: Publisher, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            publisher,
            interval,
            shutdown,
            next_sequence: 1,
            published: 0,
        }
    }

    /// Messages successfully handed to the broker so far.
    pub fn published(&self) -> u64 {
        self.published
    }
}

#[async_trait]
impl Session for IngestorService {
    type Output = u64;

    async fn run<C: Connection>(&mut self, connection: &mut C) -> Result<u64, PipelineError> {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting message publishing loop (every {} seconds)",
            self.interval.as_secs()
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(published = self.published, "Received shutdown signal, stopping publishing loop");
                    return Ok(self.published);
                }
                _ = ticker.tick() => {}
            }

            let sequence = self.next_sequence;
            let event = GameEvent::placeholder(sequence);
            match self.publisher.publish(connection, sequence, &event).await {
                Ok(_) => {
                    self.published += 1;
                    self.next_sequence += 1;
                }
                Err(PublishError::Transport(err)) => return Err(err.into()),
                // Logged by the publisher; the connection is still usable.
                Err(_) => self.next_sequence += 1,
            }
        }
    }
}
