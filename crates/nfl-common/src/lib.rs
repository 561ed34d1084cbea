//! NFL Pipeline Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, codecs, and connection plumbing for the NFL game pipeline.
//!
//! # Overview
//!
//! This crate provides the functionality used by both pipeline services
//! (`nfl-ingestor` and `nfl-processor`):
//!
//! - **Record Codec**: Parses loosely-structured CSV rows into validated [`record::GameRecord`]s
//! - **Wire Message**: The JSON payload exchanged over the queue, with a schema version tag
//! - **Resilient Connector**: Capped exponential backoff reconnect loop, cancellable
//! - **Broker**: RabbitMQ connection and durable queue declaration
//! - **Configuration**: Environment-driven config objects built once at startup
//! - **Logging**: Structured `tracing` setup shared by both binaries
//!
//! # Example
//!
//! ```no_run
//! use nfl_common::record::{parse, RawRow};
//! use nfl_common::message;
//!
//! fn to_payload(row: &RawRow) -> anyhow::Result<Option<Vec<u8>>> {
//!     match parse(row) {
//!         Ok(record) => Ok(Some(message::encode(&record)?)),
//!         Err(rejected) => {
//!             tracing::warn!(game_id = %rejected.row_id, reason = %rejected.reason, "Skipping row");
//!             Ok(None)
//!         },
//!     }
//! }
//! ```

pub mod broker;
pub mod config;
pub mod connector;
pub mod error;
pub mod logging;
pub mod message;
pub mod record;
pub mod shutdown;

// Re-export commonly used types
pub use error::{Error, Result};
pub use record::{GameRecord, RawRow};
