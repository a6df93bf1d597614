//! The `connection` module owns the broker connection lifecycle: connect
//! with exponential backoff, hand the live connection to a session, and
//! reconnect from attempt 1 when the session reports a connection-level
//! failure.

mod manager;
mod retry;

pub use manager::{ConnectionManager, ConnectionState, Session};
pub use retry::{RetryPolicy, RetryState};
