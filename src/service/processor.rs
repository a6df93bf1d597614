use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::event::ProcessedResult;
use crate::broker::{Connection, Delivery};
use crate::client::{Consumer, MessageHandler};
use crate::connection::Session;
use crate::utils::error::{HandlerError, PipelineError};

/// Decodes game events and logs a [`ProcessedResult`] for placeholder data.
#[derive(Debug, Default)]
pub struct GameEventHandler {
    processed: u64,
}

impl GameEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }
}

#[async_trait]
impl MessageHandler for GameEventHandler {
    async fn handle(&mut self, delivery: &Delivery) -> Result<(), HandlerError> {
        let message: Value = serde_json::from_slice(&delivery.body).map_err(|err| {
            error!(error = %err, "Failed to parse JSON message: {}", err);
            HandlerError::Decode(err)
        })?;

        info!(
            sequence = delivery.sequence,
            redelivered = delivery.redelivered,
            "Message received: {}",
            message
        );

        if let Some(result) = ProcessedResult::from_message(&message) {
            let rendered = serde_json::to_value(&result).unwrap_or_default();
            info!("Processing completed: {}", rendered);
        }

        self.processed += 1;
        Ok(())
    }
}

/// Consumes the queue with a [`MessageHandler`] until shutdown.
pub struct ProcessorService<H> {
    consumer: Consumer,
    handler: H,
    shutdown: CancellationToken,
}

impl<H: MessageHandler> ProcessorService<H> {
    pub fn new(consumer: Consumer, handler: H, shutdown: CancellationToken) -> Self {
        Self {
            consumer,
            handler,
            shutdown,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<H: MessageHandler> Session for ProcessorService<H> {
    type Output = ();

    async fn run<C: Connection>(&mut self, connection: &mut C) -> Result<(), PipelineError> {
        self.consumer
            .consume(connection, &mut self.handler, &self.shutdown)
            .await?;
        Ok(())
    }
}
