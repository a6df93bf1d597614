use super::memory::MemoryBroker;
use super::{BrokerEndpoint, Connection, Connector, OutboundMessage, PublishOutcome};
use crate::utils::error::ConnectionError;
use serde_json::json;
use std::time::Duration;

const QUEUE: &str = "game_events";

fn endpoint() -> BrokerEndpoint {
    BrokerEndpoint::default()
}

fn message(sequence: u64) -> OutboundMessage {
    OutboundMessage::json(sequence, &json!({ "message_number": sequence }))
        .expect("serializable payload")
}

#[test]
fn test_endpoint_display_and_redacted_debug() {
    let endpoint = BrokerEndpoint {
        password: "s3cret".to_string(),
        ..endpoint()
    };
    assert_eq!(endpoint.to_string(), "localhost:5672");
    let debug = format!("{endpoint:?}");
    assert!(!debug.contains("s3cret"));
    assert!(debug.contains("***"));
}

#[test]
fn test_attempt_key_prefers_message_id() {
    let with_id = super::Delivery {
        delivery_tag: 1,
        message_id: Some("abc".to_string()),
        sequence: None,
        timestamp: None,
        redelivered: false,
        body: b"{}".to_vec(),
    };
    let without_id = super::Delivery {
        message_id: None,
        ..with_id.clone()
    };

    assert_eq!(with_id.attempt_key(), "abc");
    assert!(without_id.attempt_key().starts_with("body-"));
    assert_eq!(without_id.attempt_key(), without_id.clone().attempt_key());
}

#[tokio::test]
async fn test_injected_messages_are_delivered() {
    let broker = MemoryBroker::new();
    broker.inject(QUEUE, None, b"not json");
    let mut conn = broker.connect(&endpoint()).await.unwrap();
    conn.subscribe(QUEUE, 1).await.unwrap();

    let delivery = conn.next_delivery().await.unwrap();
    assert_eq!(delivery.body_text(), "not json");
    assert_eq!(delivery.message_id, None);
    assert_eq!(delivery.sequence, None);
}

#[tokio::test]
async fn test_refused_connects_are_counted() {
    let broker = MemoryBroker::new();
    broker.refuse_next_connects(2);

    assert!(matches!(
        broker.connect(&endpoint()).await,
        Err(ConnectionError::Unreachable { .. })
    ));
    assert!(broker.connect(&endpoint()).await.is_err());
    let conn = broker.connect(&endpoint()).await.expect("third attempt connects");

    assert_eq!(broker.connect_attempts(), 3);
    assert_eq!(broker.open_connections(), 1);
    drop(conn);
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_publish_requires_declared_queue() {
    let broker = MemoryBroker::new();
    let mut conn = broker.connect(&endpoint()).await.unwrap();

    conn.publish(QUEUE, &message(1)).await.unwrap();
    assert_eq!(broker.queue_depth(QUEUE), 0);

    conn.declare_queue(QUEUE).await.unwrap();
    assert!(broker.is_declared(QUEUE));
    let outcome = conn.publish(QUEUE, &message(2)).await.unwrap();

    assert_eq!(outcome, PublishOutcome::Sent);
    assert_eq!(broker.queue_depth(QUEUE), 1);
    assert_eq!(broker.published(), 1);
}

#[tokio::test]
async fn test_confirms_report_rejection() {
    let broker = MemoryBroker::new();
    let confirming = BrokerEndpoint {
        publisher_confirms: true,
        ..endpoint()
    };
    let mut conn = broker.connect(&confirming).await.unwrap();
    conn.declare_queue(QUEUE).await.unwrap();

    assert_eq!(
        conn.publish(QUEUE, &message(1)).await.unwrap(),
        PublishOutcome::Confirmed
    );

    broker.reject_publishes(true);
    assert_eq!(
        conn.publish(QUEUE, &message(2)).await.unwrap(),
        PublishOutcome::Rejected
    );
    assert_eq!(broker.queue_depth(QUEUE), 1);
}

#[tokio::test]
async fn test_deliveries_arrive_in_publish_order() {
    let broker = MemoryBroker::new();
    let mut conn = broker.connect(&endpoint()).await.unwrap();
    conn.declare_queue(QUEUE).await.unwrap();
    for seq in 1..=3 {
        conn.publish(QUEUE, &message(seq)).await.unwrap();
    }

    conn.subscribe(QUEUE, 3).await.unwrap();
    let mut sequences = Vec::new();
    for _ in 0..3 {
        let delivery = conn.next_delivery().await.unwrap();
        sequences.push(delivery.sequence);
        conn.ack(delivery.delivery_tag).await.unwrap();
    }

    assert_eq!(sequences, vec![Some(1), Some(2), Some(3)]);
    assert_eq!(broker.acked().len(), 3);
    assert_eq!(broker.queue_depth(QUEUE), 0);
}

#[tokio::test]
async fn test_prefetch_limits_unacked_deliveries() {
    let broker = MemoryBroker::new();
    let mut conn = broker.connect(&endpoint()).await.unwrap();
    conn.declare_queue(QUEUE).await.unwrap();
    conn.publish(QUEUE, &message(1)).await.unwrap();
    conn.publish(QUEUE, &message(2)).await.unwrap();
    conn.subscribe(QUEUE, 1).await.unwrap();

    let first = conn.next_delivery().await.unwrap();
    let blocked = tokio::time::timeout(Duration::from_millis(50), conn.next_delivery()).await;
    assert!(blocked.is_err(), "second delivery must wait for the first ack");

    conn.ack(first.delivery_tag).await.unwrap();
    let second = conn.next_delivery().await.unwrap();
    assert_eq!(second.sequence, Some(2));
}

#[tokio::test]
async fn test_nack_with_and_without_requeue() {
    let broker = MemoryBroker::new();
    let mut conn = broker.connect(&endpoint()).await.unwrap();
    conn.declare_queue(QUEUE).await.unwrap();
    conn.publish(QUEUE, &message(1)).await.unwrap();
    conn.subscribe(QUEUE, 1).await.unwrap();

    let first = conn.next_delivery().await.unwrap();
    assert!(!first.redelivered);
    conn.nack(first.delivery_tag, true).await.unwrap();

    let again = conn.next_delivery().await.unwrap();
    assert!(again.redelivered);
    assert_eq!(again.message_id, first.message_id);
    conn.nack(again.delivery_tag, false).await.unwrap();

    assert_eq!(broker.requeued(), 1);
    assert_eq!(broker.dropped(), vec![first.attempt_key()]);
    assert_eq!(broker.queue_depth(QUEUE), 0);
}

#[tokio::test]
async fn test_settling_unknown_tag_fails() {
    let broker = MemoryBroker::new();
    let mut conn = broker.connect(&endpoint()).await.unwrap();
    assert!(matches!(conn.ack(42).await, Err(ConnectionError::Closed(_))));
}

#[tokio::test]
async fn test_dropped_connection_requeues_unacked() {
    let broker = MemoryBroker::new();
    let mut conn = broker.connect(&endpoint()).await.unwrap();
    conn.declare_queue(QUEUE).await.unwrap();
    conn.publish(QUEUE, &message(7)).await.unwrap();
    conn.subscribe(QUEUE, 1).await.unwrap();
    let delivery = conn.next_delivery().await.unwrap();
    assert_eq!(broker.in_flight(), 1);

    broker.drop_connections();

    assert!(matches!(
        conn.ack(delivery.delivery_tag).await,
        Err(ConnectionError::Closed(_))
    ));
    assert_eq!(broker.in_flight(), 0);
    assert_eq!(broker.queue_depth(QUEUE), 1);
    assert_eq!(broker.open_connections(), 0);

    let mut fresh = broker.connect(&endpoint()).await.unwrap();
    fresh.subscribe(QUEUE, 1).await.unwrap();
    let redelivered = fresh.next_delivery().await.unwrap();
    assert!(redelivered.redelivered);
    assert_eq!(redelivered.sequence, Some(7));
}

#[tokio::test]
async fn test_waiting_receiver_sees_connection_drop() {
    let broker = MemoryBroker::new();
    let mut conn = broker.connect(&endpoint()).await.unwrap();
    conn.declare_queue(QUEUE).await.unwrap();
    conn.subscribe(QUEUE, 1).await.unwrap();

    let handle = tokio::spawn(async move { conn.next_delivery().await });
    tokio::task::yield_now().await;
    broker.drop_connections();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(ConnectionError::Closed(_))));
}

#[tokio::test]
async fn test_waiting_receiver_wakes_on_publish() {
    let broker = MemoryBroker::new();
    let mut consumer = broker.connect(&endpoint()).await.unwrap();
    consumer.declare_queue(QUEUE).await.unwrap();
    consumer.subscribe(QUEUE, 1).await.unwrap();

    let handle = tokio::spawn(async move { consumer.next_delivery().await });
    tokio::task::yield_now().await;

    let mut producer = broker.connect(&endpoint()).await.unwrap();
    producer.publish(QUEUE, &message(9)).await.unwrap();

    let delivery = handle.await.unwrap().unwrap();
    assert_eq!(delivery.sequence, Some(9));
}

#[tokio::test]
async fn test_close_is_idempotent_and_rejects_further_use() {
    let broker = MemoryBroker::new();
    let mut conn = broker.connect(&endpoint()).await.unwrap();
    conn.close().await.unwrap();
    conn.close().await.unwrap();

    assert_eq!(broker.open_connections(), 0);
    assert!(conn.declare_queue(QUEUE).await.is_err());
}

#[tokio::test]
#[ignore = "needs a RabbitMQ broker on localhost:5672"]
async fn test_amqp_round_trip() {
    use super::AmqpConnector;

    let endpoint = BrokerEndpoint {
        queue: format!("gamefeed_test_{}", uuid::Uuid::new_v4()),
        publisher_confirms: true,
        ..endpoint()
    };
    let connector = AmqpConnector::new("gamefeed-test");
    let mut conn = connector.connect(&endpoint).await.expect("broker reachable");

    conn.declare_queue(&endpoint.queue).await.unwrap();
    let sent = message(5);
    assert_eq!(
        conn.publish(&endpoint.queue, &sent).await.unwrap(),
        PublishOutcome::Confirmed
    );

    conn.subscribe(&endpoint.queue, 1).await.unwrap();
    let delivery = conn.next_delivery().await.unwrap();
    assert_eq!(delivery.message_id.as_deref(), Some(sent.message_id.as_str()));
    assert_eq!(delivery.sequence, Some(5));
    assert_eq!(delivery.body, sent.body);
    conn.ack(delivery.delivery_tag).await.unwrap();
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_connection_closes_after_failed_channel_close() {
    use super::amqp::close_in_order;
    use std::sync::atomic::{AtomicBool, Ordering};

    let connection_closed = AtomicBool::new(false);
    let result = close_in_order(
        async { Err(ConnectionError::Transport("channel already closed".to_string())) },
        async {
            connection_closed.store(true, Ordering::SeqCst);
            Ok(())
        },
    )
    .await;

    assert!(connection_closed.load(Ordering::SeqCst));
    assert!(matches!(result, Err(ConnectionError::Transport(msg)) if msg == "channel already closed"));
}

#[tokio::test]
async fn test_close_reports_first_error() {
    use super::amqp::close_in_order;

    let result = close_in_order(
        async { Err(ConnectionError::Transport("channel".to_string())) },
        async { Err(ConnectionError::Transport("connection".to_string())) },
    )
    .await;
    assert!(matches!(result, Err(ConnectionError::Transport(msg)) if msg == "channel"));

    let result = close_in_order(async { Ok(()) }, async {
        Err(ConnectionError::Transport("connection".to_string()))
    })
    .await;
    assert!(matches!(result, Err(ConnectionError::Transport(msg)) if msg == "connection"));
}
