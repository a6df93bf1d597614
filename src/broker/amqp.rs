//! RabbitMQ connector built on `lapin`.
//!
//! One AMQP connection with a single channel per [`AmqpConnection`]. Queues
//! are declared durable, messages are published persistent
//! (`delivery_mode = 2`) through the default exchange with the queue name as
//! routing key, and consumption uses manual acks with a prefetch limit.
//!
//! Publisher confirms are off unless the endpoint asks for them. Without
//! them a publish returns once the frame is handed to the transport.

use async_trait::async_trait;
use chrono::DateTime;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable};
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, ConnectionProperties};
use tracing::debug;

use super::message::SEQUENCE_HEADER;
use super::{BrokerEndpoint, Connection, Connector, Delivery, OutboundMessage, PublishOutcome};
use crate::utils::error::ConnectionError;

const REPLY_SUCCESS: u16 = 200;

fn transport(err: lapin::Error) -> ConnectionError {
    ConnectionError::Transport(err.to_string())
}

/// Runs `channel` then `connection`. The connection close is attempted even
/// when the channel close fails, since lapin does not close a connection on
/// drop. The first error is returned.
pub(crate) async fn close_in_order<A, B>(channel: A, connection: B) -> Result<(), ConnectionError>
where
    A: Future<Output = Result<(), ConnectionError>>,
    B: Future<Output = Result<(), ConnectionError>>,
{
    let channel_closed = channel.await;
    let connection_closed = connection.await;
    channel_closed.and(connection_closed)
}

/// Connects to RabbitMQ.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    connection_name: String,
}

impl AmqpConnector {
    /// `connection_name` shows up in the RabbitMQ management UI.
    pub fn new(connection_name: &str) -> Self {
        Self {
            connection_name: connection_name.to_string(),
        }
    }

    fn uri(endpoint: &BrokerEndpoint) -> AMQPUri {
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: endpoint.username.clone(),
                    password: endpoint.password.clone(),
                },
                host: endpoint.host.clone(),
                port: endpoint.port,
            },
            vhost: endpoint.vhost.clone(),
            query: AMQPQueryString {
                heartbeat: Some(endpoint.heartbeat),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    type Connection = AmqpConnection;

    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<AmqpConnection, ConnectionError> {
        let properties = ConnectionProperties::default()
            .with_connection_name(self.connection_name.clone().into());

        let connection = lapin::Connection::connect_uri(Self::uri(endpoint), properties)
            .await
            .map_err(|e| ConnectionError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let channel = connection.create_channel().await.map_err(transport)?;

        if endpoint.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(transport)?;
        }

        Ok(AmqpConnection {
            connection,
            channel,
            consumer: None,
        })
    }
}

/// Live AMQP connection and its channel.
pub struct AmqpConnection {
    connection: lapin::Connection,
    channel: Channel,
    consumer: Option<lapin::Consumer>,
}

impl AmqpConnection {
    fn properties(message: &OutboundMessage) -> BasicProperties {
        let mut headers = FieldTable::default();
        headers.insert(
            SEQUENCE_HEADER.into(),
            AMQPValue::LongLongInt(message.sequence as i64),
        );

        BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_message_id(message.message_id.clone().into())
            .with_timestamp(message.timestamp.timestamp().max(0) as u64)
            .with_headers(headers)
    }

    fn delivery(delivery: lapin::message::Delivery) -> Delivery {
        let properties = &delivery.properties;

        let sequence = properties.headers().as_ref().and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == SEQUENCE_HEADER)
                .and_then(|(_, value)| match value {
                    AMQPValue::LongLongInt(v) => u64::try_from(*v).ok(),
                    AMQPValue::LongInt(v) => u64::try_from(*v).ok(),
                    AMQPValue::LongUInt(v) => Some(u64::from(*v)),
                    AMQPValue::Timestamp(v) => Some(*v),
                    _ => None,
                })
        });

        Delivery {
            delivery_tag: delivery.delivery_tag,
            message_id: properties.message_id().as_ref().map(|id| id.to_string()),
            sequence,
            timestamp: (*properties.timestamp())
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
            redelivered: delivery.redelivered,
            body: delivery.data,
        }
    }
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn declare_queue(&mut self, queue: &str) -> Result<(), ConnectionError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;
        Ok(())
    }

    async fn publish(
        &mut self,
        queue: &str,
        message: &OutboundMessage,
    ) -> Result<PublishOutcome, ConnectionError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &message.body,
                Self::properties(message),
            )
            .await
            .map_err(transport)?;

        // Resolves immediately with NotRequested when confirms are off.
        match confirm.await.map_err(transport)? {
            Confirmation::Ack(_) => Ok(PublishOutcome::Confirmed),
            Confirmation::Nack(_) => Ok(PublishOutcome::Rejected),
            Confirmation::NotRequested => Ok(PublishOutcome::Sent),
        }
    }

    async fn subscribe(&mut self, queue: &str, prefetch: u16) -> Result<(), ConnectionError> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(transport)?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(transport)?;

        debug!(queue, prefetch, consumer_tag = consumer.tag().as_str(), "Subscribed to queue");
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Delivery, ConnectionError> {
        let consumer = self
            .consumer
            .as_mut()
            .ok_or_else(|| ConnectionError::Closed("no active subscription".to_string()))?;

        match consumer.next().await {
            Some(Ok(delivery)) => Ok(Self::delivery(delivery)),
            Some(Err(e)) => Err(transport(e)),
            None => Err(ConnectionError::Closed("consumer stream ended".to_string())),
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), ConnectionError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(transport)
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), ConnectionError> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(transport)
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.consumer = None;
        let channel = &self.channel;
        let connection = &self.connection;

        close_in_order(
            async {
                if channel.status().connected() {
                    channel
                        .close(REPLY_SUCCESS, "shutdown")
                        .await
                        .map_err(transport)
                } else {
                    Ok(())
                }
            },
            async {
                if connection.status().connected() {
                    connection
                        .close(REPLY_SUCCESS, "shutdown")
                        .await
                        .map_err(transport)
                } else {
                    Ok(())
                }
            },
        )
        .await
    }
}
