//! The `error` module defines the error types shared by the ingestor and
//! processor.
//!
//! Errors are split by who recovers from them:
//!
//! - [`ConnectionError`]: the broker is unreachable or the link dropped. The
//!   `ConnectionManager` turns these into a reconnect with backoff.
//! - [`PublishError`] / [`HandlerError`]: payload or handling failures. They
//!   are logged and never tear down a healthy connection on their own.
//! - [`ConfigurationError`]: fatal at startup; the process exits non-zero.
//!
//! [`PipelineError`] is the umbrella type returned by session bodies.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("broker unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("connect attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("gave up connecting after {attempts} attempts over {elapsed:?}")]
    GaveUp { attempts: u32, elapsed: Duration },
}

impl ConnectionError {
    /// Only an exhausted retry deadline is fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::GaveUp { .. })
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker rejected message {message_id}")]
    Rejected { message_id: String },

    #[error(transparent)]
    Transport(#[from] ConnectionError),
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("undecodable payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// A permanent failure will not succeed on redelivery.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl PipelineError {
    /// Whether this error means the current connection is unusable and the
    /// caller should reconnect rather than give up.
    pub fn is_connection_level(&self) -> bool {
        match self {
            Self::Connection(err) | Self::Publish(PublishError::Transport(err)) => !err.is_fatal(),
            _ => false,
        }
    }
}
