//! NFL Ingestor
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Reads NFL game rows from a CSV file, validates them and publishes each
//! valid game to a durable RabbitMQ queue at a fixed pace.
//!
//! - [`reader`]: lazy, header-keyed CSV rows
//! - [`publisher`]: durable queue declaration and persistent, confirmed sends
//! - [`ingest`]: the parse, publish, pause loop

pub mod ingest;
pub mod publisher;
pub mod reader;

pub use ingest::{IngestError, IngestSummary, Ingestor};
pub use publisher::{publish, AmqpTransport, PublishError, QueueTransport};
pub use reader::{open_rows, ReaderError};
