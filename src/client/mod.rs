//! The `client` module holds the two roles that drive a broker connection:
//! the [`Publisher`] on the producing side and the [`Consumer`] with its
//! [`MessageHandler`] on the consuming side.
//!
//! Neither owns a connection. Both borrow the one lent out by the
//! `ConnectionManager` for the duration of a call.

pub mod consumer;
pub mod publisher;

pub use consumer::{Consumer, Disposition, MessageHandler, RedeliveryPolicy};
pub use publisher::Publisher;
