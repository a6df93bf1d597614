//! In-process broker.
//!
//! `MemoryBroker` models the parts of RabbitMQ the pipeline depends on:
//! durable FIFO queues, manual acks, nack with or without requeue, prefetch
//! limits and redelivery of unacked messages when a connection goes away.
//! It also lets tests inject failures: refuse the next N connects, go
//! offline, drop every live connection, or nack publishes.
//!
//! All clones share the same state. A connection that is dropped without
//! `close()` releases its unacked deliveries just like a closed one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::{BrokerEndpoint, Connection, Connector, Delivery, OutboundMessage, PublishOutcome};
use crate::utils::error::ConnectionError;

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: Option<String>,
    sequence: Option<u64>,
    timestamp: Option<DateTime<Utc>>,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct InFlight {
    connection_id: u64,
    queue: String,
    message: StoredMessage,
}

#[derive(Debug, Default)]
struct State {
    offline: bool,
    refuse_connects: u32,
    reject_publishes: bool,
    connect_attempts: u32,
    epoch: u64,
    next_connection_id: u64,
    open_connections: usize,
    next_delivery_tag: u64,
    declared: HashSet<String>,
    queues: HashMap<String, VecDeque<StoredMessage>>,
    in_flight: HashMap<u64, InFlight>,
    published: u64,
    acked: Vec<String>,
    dropped: Vec<String>,
    requeued: u64,
}

impl State {
    /// Puts every unacked delivery of `connection_id` back at the head of its
    /// queue, flagged as redelivered. `None` releases all connections.
    fn release(&mut self, connection_id: Option<u64>) {
        let mut tags: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| connection_id.is_none_or(|id| f.connection_id == id))
            .map(|(tag, _)| *tag)
            .collect();
        // Requeue newest first so the oldest ends up at the front.
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(mut flight) = self.in_flight.remove(&tag) {
                flight.message.redelivered = true;
                self.queues
                    .entry(flight.queue)
                    .or_default()
                    .push_front(flight.message);
            }
        }
    }

    fn in_flight_for(&self, connection_id: u64) -> usize {
        self.in_flight
            .values()
            .filter(|f| f.connection_id == connection_id)
            .count()
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to an in-process broker. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses the next `count` connect attempts.
    pub fn refuse_next_connects(&self, count: u32) {
        self.shared.lock().refuse_connects = count;
    }

    /// While offline every connect attempt fails.
    pub fn set_offline(&self, offline: bool) {
        self.shared.lock().offline = offline;
    }

    /// Nacks every publish on connections with publisher confirms, and
    /// silently discards them on connections without.
    pub fn reject_publishes(&self, reject: bool) {
        self.shared.lock().reject_publishes = reject;
    }

    /// Severs every live connection. Their unacked deliveries are requeued.
    pub fn drop_connections(&self) {
        {
            let mut state = self.shared.lock();
            state.epoch += 1;
            state.open_connections = 0;
            state.release(None);
        }
        self.shared.notify.notify_waiters();
    }

    /// Enqueues a raw message as if another producer had published it.
    pub fn inject(&self, queue: &str, message_id: Option<&str>, body: &[u8]) {
        {
            let mut state = self.shared.lock();
            state.declared.insert(queue.to_string());
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(StoredMessage {
                    message_id: message_id.map(str::to_string),
                    sequence: None,
                    timestamp: None,
                    body: body.to_vec(),
                    redelivered: false,
                });
        }
        self.shared.notify.notify_waiters();
    }

    pub fn connect_attempts(&self) -> u32 {
        self.shared.lock().connect_attempts
    }

    pub fn open_connections(&self) -> usize {
        self.shared.lock().open_connections
    }

    pub fn is_declared(&self, queue: &str) -> bool {
        self.shared.lock().declared.contains(queue)
    }

    /// Ready messages, not counting unacked deliveries.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.shared.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight.len()
    }

    /// Messages accepted into a queue.
    pub fn published(&self) -> u64 {
        self.shared.lock().published
    }

    /// Attempt keys of acked messages, in ack order.
    pub fn acked(&self) -> Vec<String> {
        self.shared.lock().acked.clone()
    }

    /// Attempt keys of messages nacked without requeue.
    pub fn dropped(&self) -> Vec<String> {
        self.shared.lock().dropped.clone()
    }

    /// Number of nacks with requeue.
    pub fn requeued(&self) -> u64 {
        self.shared.lock().requeued
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<MemoryConnection, ConnectionError> {
        let mut state = self.shared.lock();
        state.connect_attempts += 1;

        if state.offline || state.refuse_connects > 0 {
            state.refuse_connects = state.refuse_connects.saturating_sub(1);
            return Err(ConnectionError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        state.next_connection_id += 1;
        state.open_connections += 1;

        Ok(MemoryConnection {
            shared: self.shared.clone(),
            id: state.next_connection_id,
            epoch: state.epoch,
            confirms: endpoint.publisher_confirms,
            subscription: None,
            closed: false,
        })
    }
}

/// A connection to a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    id: u64,
    epoch: u64,
    confirms: bool,
    subscription: Option<(String, u16)>,
    closed: bool,
}

impl MemoryConnection {
    fn live<'a>(&self, state: &'a mut MutexGuard<'_, State>) -> Result<&'a mut State, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed("connection already closed".to_string()));
        }
        if state.epoch != self.epoch {
            return Err(ConnectionError::Closed("connection reset by broker".to_string()));
        }
        Ok(&mut **state)
    }

    fn settle(&mut self, delivery_tag: u64) -> Result<InFlight, ConnectionError> {
        let mut guard = self.shared.lock();
        let state = self.live(&mut guard)?;
        match state.in_flight.remove(&delivery_tag) {
            Some(flight) if flight.connection_id == self.id => Ok(flight),
            Some(flight) => {
                state.in_flight.insert(delivery_tag, flight);
                Err(ConnectionError::Closed(format!(
                    "unknown delivery tag {delivery_tag}"
                )))
            }
            // Settling an unknown tag closes the channel on a real broker.
            None => Err(ConnectionError::Closed(format!(
                "unknown delivery tag {delivery_tag}"
            ))),
        }
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut state = self.shared.lock();
            if state.epoch == self.epoch {
                state.release(Some(self.id));
                state.open_connections = state.open_connections.saturating_sub(1);
            }
        }
        self.shared.notify.notify_waiters();
    }
}

fn key_of(message: &StoredMessage) -> String {
    Delivery {
        delivery_tag: 0,
        message_id: message.message_id.clone(),
        sequence: message.sequence,
        timestamp: message.timestamp,
        redelivered: message.redelivered,
        body: message.body.clone(),
    }
    .attempt_key()
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn declare_queue(&mut self, queue: &str) -> Result<(), ConnectionError> {
        let mut guard = self.shared.lock();
        let state = self.live(&mut guard)?;
        state.declared.insert(queue.to_string());
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(
        &mut self,
        queue: &str,
        message: &OutboundMessage,
    ) -> Result<PublishOutcome, ConnectionError> {
        let outcome = {
            let mut guard = self.shared.lock();
            let state = self.live(&mut guard)?;

            if state.reject_publishes {
                return Ok(if self.confirms {
                    PublishOutcome::Rejected
                } else {
                    PublishOutcome::Sent
                });
            }

            // The default exchange drops messages for queues that do not exist.
            if state.declared.contains(queue) {
                state
                    .queues
                    .entry(queue.to_string())
                    .or_default()
                    .push_back(StoredMessage {
                        message_id: Some(message.message_id.clone()),
                        sequence: Some(message.sequence),
                        timestamp: Some(message.timestamp),
                        body: message.body.clone(),
                        redelivered: false,
                    });
                state.published += 1;
            }

            if self.confirms {
                PublishOutcome::Confirmed
            } else {
                PublishOutcome::Sent
            }
        };
        self.shared.notify.notify_waiters();
        Ok(outcome)
    }

    async fn subscribe(&mut self, queue: &str, prefetch: u16) -> Result<(), ConnectionError> {
        let mut guard = self.shared.lock();
        self.live(&mut guard)?;
        self.subscription = Some((queue.to_string(), prefetch.max(1)));
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Delivery, ConnectionError> {
        let (queue, prefetch) = self
            .subscription
            .clone()
            .ok_or_else(|| ConnectionError::Closed("no active subscription".to_string()))?;

        loop {
            // Registered before checking so a concurrent notify is not lost.
            let notified = self.shared.notify.notified();
            {
                let mut guard = self.shared.lock();
                let state = self.live(&mut guard)?;

                if state.in_flight_for(self.id) < usize::from(prefetch) {
                    let next = state.queues.get_mut(&queue).and_then(VecDeque::pop_front);
                    if let Some(message) = next {
                        state.next_delivery_tag += 1;
                        let delivery_tag = state.next_delivery_tag;
                        let delivery = Delivery {
                            delivery_tag,
                            message_id: message.message_id.clone(),
                            sequence: message.sequence,
                            timestamp: message.timestamp,
                            redelivered: message.redelivered,
                            body: message.body.clone(),
                        };
                        state.in_flight.insert(
                            delivery_tag,
                            InFlight {
                                connection_id: self.id,
                                queue: queue.clone(),
                                message,
                            },
                        );
                        return Ok(delivery);
                    }
                }
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), ConnectionError> {
        let flight = self.settle(delivery_tag)?;
        self.shared.lock().acked.push(key_of(&flight.message));
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), ConnectionError> {
        let InFlight {
            queue, mut message, ..
        } = self.settle(delivery_tag)?;
        {
            let mut state = self.shared.lock();
            if requeue {
                message.redelivered = true;
                state.queues.entry(queue).or_default().push_front(message);
                state.requeued += 1;
            } else {
                state.dropped.push(key_of(&message));
            }
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}
