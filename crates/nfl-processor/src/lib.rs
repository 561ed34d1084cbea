//! NFL Processor
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Consumes game messages from RabbitMQ and upserts them into PostgreSQL.
//!
//! # Architecture
//!
//! - [`db`]: connection pool, migrations
//! - [`storage`]: the `games` upsert behind the [`GameStore`] trait
//! - [`consumer`]: decode, store and settle one delivery at a time
//! - [`dead_letter`]: optional destination for records the database refused

pub mod consumer;
pub mod db;
pub mod dead_letter;
pub mod storage;

pub use consumer::{start_consuming, Consumer, ConsumerError, ConsumerStats, Disposition, InboundMessage};
pub use dead_letter::{AmqpDeadLetter, DeadLetterError, DeadLetterSink};
pub use storage::{GameStore, PgGameStore, StorageError, UpsertOutcome};
