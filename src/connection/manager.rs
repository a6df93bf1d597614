use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::retry::{RetryPolicy, RetryState};
use crate::broker::{BrokerEndpoint, Connection, Connector};
use crate::utils::error::{ConnectionError, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A unit of work that needs a live connection: the ingestor's publish loop
/// or the processor's consume loop.
///
/// Returning a connection-level [`PipelineError`] hands control back to the
/// [`ConnectionManager`], which reconnects and calls `run` again. Sessions
/// keep their own progress (sequence counters, attempt maps) across calls.
#[async_trait]
pub trait Session: Send {
    type Output: Send;

    async fn run<C: Connection>(&mut self, connection: &mut C) -> Result<Self::Output, PipelineError>;
}

/// Owns the broker connection for the lifetime of a service.
///
/// At most one connection exists at a time: it is created by [`connect`],
/// lent to the session, and closed or discarded before a new one is opened.
///
/// [`connect`]: ConnectionManager::connect
pub struct ConnectionManager<K: Connector> {
    connector: K,
    endpoint: BrokerEndpoint,
    policy: RetryPolicy,
    connect_timeout: Option<Duration>,
    retry_deadline: Option<Duration>,
    shutdown: CancellationToken,
    state: ConnectionState,
    retry: RetryState,
}

impl<K: Connector> ConnectionManager<K> {
    pub fn new(connector: K, endpoint: BrokerEndpoint, shutdown: CancellationToken) -> Self {
        Self {
            connector,
            endpoint,
            policy: RetryPolicy::default(),
            connect_timeout: None,
            retry_deadline: None,
            shutdown,
            state: ConnectionState::Disconnected,
            retry: RetryState::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bounds each connect attempt. `None` waits as long as the connector does.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Gives up with [`ConnectionError::GaveUp`] once the next backoff would
    /// run past `deadline`, measured from the first attempt of a sequence.
    pub fn with_retry_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.retry_deadline = deadline;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    fn transition(&mut self, to: ConnectionState) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "connection state changed");
            self.state = to;
        }
    }

    async fn attempt(&self) -> Result<K::Connection, ConnectionError> {
        let connect = self.connector.connect(&self.endpoint);
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| ConnectionError::Timeout(limit))?,
            None => connect.await,
        }
    }

    /// Connects, retrying with backoff until it succeeds.
    ///
    /// Returns `Ok(None)` if shutdown is requested first, and an error only
    /// when a retry deadline is configured and exhausted.
    pub async fn connect(&mut self) -> Result<Option<K::Connection>, ConnectionError> {
        let shutdown = self.shutdown.clone();
        let started = Instant::now();
        self.retry.reset();

        loop {
            if shutdown.is_cancelled() {
                self.transition(ConnectionState::Disconnected);
                return Ok(None);
            }

            let attempt = self.retry.begin_attempt();
            self.transition(ConnectionState::Connecting);
            info!(
                attempt,
                "Attempting to connect to RabbitMQ at {}", self.endpoint
            );

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => None,
                result = self.attempt() => Some(result),
            };

            let err = match outcome {
                None => {
                    info!("Shutdown requested while connecting");
                    self.transition(ConnectionState::Disconnected);
                    return Ok(None);
                }
                Some(Ok(connection)) => {
                    self.transition(ConnectionState::Connected);
                    info!(attempt, "Successfully connected to RabbitMQ");
                    self.retry.reset();
                    return Ok(Some(connection));
                }
                Some(Err(err)) => err,
            };

            self.transition(ConnectionState::Failed);
            let delay = self.policy.delay(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Failed to connect to RabbitMQ, retrying in {:?}",
                delay
            );

            if let Some(deadline) = self.retry_deadline {
                let elapsed = started.elapsed();
                if elapsed + delay > deadline {
                    error!(
                        attempts = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Giving up on RabbitMQ after {} attempts",
                        attempt
                    );
                    return Err(ConnectionError::GaveUp {
                        attempts: attempt,
                        elapsed,
                    });
                }
            }

            self.retry.record_wait(delay);
            let cancelled = tokio::select! {
                _ = shutdown.cancelled() => true,
                _ = tokio::time::sleep(delay) => false,
            };
            if cancelled {
                info!("Shutdown requested during backoff");
                self.transition(ConnectionState::Disconnected);
                return Ok(None);
            }
        }
    }

    /// Runs `session` on a live connection, reconnecting whenever it fails
    /// with a connection-level error.
    ///
    /// Every reconnect is preceded by a backoff pause. Sessions that fail
    /// before running for `max_delay` count as unstable and grow the pause
    /// along the retry policy; a longer-lived session resets it to the base
    /// delay. Connect attempts themselves still start from attempt 1.
    ///
    /// Returns `Ok(None)` if shutdown wins before a session completes. The
    /// connection is closed on every exit path.
    pub async fn run_with_reconnect<S: Session>(
        &mut self,
        session: &mut S,
    ) -> Result<Option<S::Output>, PipelineError> {
        let shutdown = self.shutdown.clone();
        let mut unstable: u32 = 0;

        loop {
            let Some(mut connection) = self.connect().await? else {
                return Ok(None);
            };

            let started = Instant::now();
            let result = session.run(&mut connection).await;
            let lived = started.elapsed();

            match result {
                Err(err) if err.is_connection_level() => {
                    self.release(connection).await;

                    unstable = if lived < self.policy.max_delay {
                        unstable.saturating_add(1)
                    } else {
                        1
                    };
                    let pause = self.policy.delay(unstable);
                    warn!(
                        error = %err,
                        delay_ms = pause.as_millis() as u64,
                        session_ms = lived.as_millis() as u64,
                        "Connection lost, reconnecting in {:?}",
                        pause
                    );

                    let cancelled = tokio::select! {
                        _ = shutdown.cancelled() => true,
                        _ = tokio::time::sleep(pause) => false,
                    };
                    if cancelled {
                        info!("Shutdown requested before reconnecting");
                        return Ok(None);
                    }
                }
                result => {
                    self.release(connection).await;
                    return result.map(Some);
                }
            }
        }
    }

    async fn release(&mut self, mut connection: K::Connection) {
        match connection.close().await {
            Ok(()) => info!("RabbitMQ connection closed"),
            // The handle is dropped regardless.
            Err(err) => warn!(error = %err, "Failed to close RabbitMQ connection cleanly"),
        }
        self.transition(ConnectionState::Disconnected);
    }
}
