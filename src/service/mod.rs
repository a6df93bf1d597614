//! The `service` module wires configuration, the connection manager and the
//! client roles into the two long-running services.
//!
//! - `ingestor`: publishes a placeholder [`GameEvent`] every
//!   `INGESTOR_INTERVAL` seconds.
//! - `processor`: consumes game events, logs them and acks each one after it
//!   has been handled.
//!
//! Both run until the shutdown token is cancelled and close their broker
//! connection before returning.

pub mod event;
pub mod ingestor;
pub mod processor;
pub mod shutdown;

use tokio_util::sync::CancellationToken;

use crate::broker::{AmqpConnector, Connector};
use crate::client::{Consumer, Publisher, RedeliveryPolicy};
use crate::config::Settings;
use crate::connection::ConnectionManager;
use crate::utils::error::PipelineError;

pub use event::{GameEvent, PLACEHOLDER_STATUS, ProcessedResult};
pub use ingestor::IngestorService;
pub use processor::{GameEventHandler, ProcessorService};

pub const INGESTOR_SERVICE: &str = "ingestor";
pub const PROCESSOR_SERVICE: &str = "processor";

/// Builds a connection manager for `connector` from `settings`.
pub fn connection_manager<K: Connector>(
    connector: K,
    settings: &Settings,
    shutdown: CancellationToken,
) -> ConnectionManager<K> {
    ConnectionManager::new(connector, settings.endpoint(), shutdown)
        .with_retry_policy(settings.retry_policy())
        .with_connect_timeout(settings.connect_timeout())
        .with_retry_deadline(settings.retry_deadline())
}

pub fn ingestor_service(settings: &Settings, shutdown: CancellationToken) -> IngestorService {
    IngestorService::new(
        Publisher::new(&settings.rabbitmq.queue),
        settings.publish_interval(),
        shutdown,
    )
}

pub fn processor_service(
    settings: &Settings,
    shutdown: CancellationToken,
) -> ProcessorService<GameEventHandler> {
    let consumer = Consumer::new(&settings.rabbitmq.queue)
        .with_prefetch(settings.processor.prefetch)
        .with_redelivery(RedeliveryPolicy {
            max_attempts: settings.processor.attempts,
        });
    ProcessorService::new(consumer, GameEventHandler::new(), shutdown)
}

/// Runs the ingestor against RabbitMQ until `shutdown` is cancelled.
pub async fn run_ingestor(settings: &Settings, shutdown: CancellationToken) -> Result<(), PipelineError> {
    let connector = AmqpConnector::new(INGESTOR_SERVICE);
    let mut manager = connection_manager(connector, settings, shutdown.clone());
    let mut service = ingestor_service(settings, shutdown);
    manager.run_with_reconnect(&mut service).await?;
    Ok(())
}

/// Runs the processor against RabbitMQ until `shutdown` is cancelled.
pub async fn run_processor(settings: &Settings, shutdown: CancellationToken) -> Result<(), PipelineError> {
    let connector = AmqpConnector::new(PROCESSOR_SERVICE);
    let mut manager = connection_manager(connector, settings, shutdown.clone());
    let mut service = processor_service(settings, shutdown);
    manager.run_with_reconnect(&mut service).await?;
    Ok(())
}
