//! # gamefeed
//!
//! `gamefeed` is a pair of services connected by a durable RabbitMQ queue:
//! an ingestor that publishes game events on a timer and a processor that
//! consumes them with at-least-once delivery. Both survive broker outages by
//! reconnecting with exponential backoff and log one JSON object per line.
//!
//! ## Core Modules
//!
//! - `broker`: the `Connector`/`Connection` seam, with a `lapin` AMQP
//!   implementation and an in-memory broker.
//! - `client`: the `Publisher` and the `Consumer` with its redelivery policy.
//! - `config`: loading and validating settings from the environment.
//! - `connection`: the `ConnectionManager` and its `RetryPolicy`.
//! - `service`: the ingestor and processor loops and signal handling.
//! - `utils`: error types and the structured logger.

pub mod broker;
pub mod client;
pub mod config;
pub mod connection;
pub mod service;
pub mod utils;
