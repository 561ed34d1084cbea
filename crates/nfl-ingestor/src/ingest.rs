//! Ingest run loop
//!
//! Walks the input rows in file order: parse, publish, pause. Rows that fail
//! to parse are logged and skipped without a pause. An input read failure
//! ends the run with an error. Shutdown is honoured between rows and during
//! the pause, never halfway through a publish.

use nfl_common::record::{self, RawRow};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::publisher::{publish, PublishError, QueueTransport};
use crate::reader::ReaderError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to read input: {0}")]
    Input(#[from] ReaderError),

    #[error("Failed to publish game {game_id}: {source}")]
    Publish {
        game_id: i64,
        #[source]
        source: PublishError,
    },
}

/// Counters for one ingest run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub rows_read: u64,
    pub published: u64,
    pub skipped: u64,
    /// True when the run stopped on a shutdown request before the input ended
    pub interrupted: bool,
}

/// Publishes parsed rows to one queue at a fixed pace
pub struct Ingestor<T> {
    transport: T,
    queue: String,
    interval: Duration,
}

impl<T: QueueTransport> Ingestor<T> {
    pub fn new(transport: T, queue: impl Into<String>, interval: Duration) -> Self {
        Self {
            transport,
            queue: queue.into(),
            interval,
        }
    }

    /// Publish every valid row, pausing `interval` after each publish
    ///
    /// A publish or input failure aborts the run. Returns early, with
    /// [`IngestSummary::interrupted`] set, once `shutdown` is cancelled.
    pub async fn run<I>(&self, rows: I, shutdown: &CancellationToken) -> Result<IngestSummary, IngestError>
    where
        I: IntoIterator<Item = Result<RawRow, ReaderError>>,
    {
        let mut summary = IngestSummary::default();

        for row in rows {
            if shutdown.is_cancelled() {
                summary.interrupted = true;
                break;
            }
            let row = row?;
            summary.rows_read += 1;

            let record = match record::parse(&row) {
                Ok(record) => record,
                Err(rejected) => {
                    summary.skipped += 1;
                    warn!(
                        game_id = %rejected.row_id,
                        reason = %rejected.reason,
                        row = summary.rows_read,
                        "Skipped invalid row"
                    );
                    continue;
                },
            };

            publish(&self.transport, &self.queue, &record)
                .await
                .map_err(|source| IngestError::Publish {
                    game_id: record.game_id,
                    source,
                })?;
            summary.published += 1;

            let cancelled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => true,
                _ = tokio::time::sleep(self.interval) => false,
            };
            if cancelled {
                summary.interrupted = true;
                break;
            }
        }

        if summary.interrupted {
            info!(
                rows_read = summary.rows_read,
                published = summary.published,
                skipped = summary.skipped,
                "Shutdown requested, stopping ingest"
            );
        } else {
            info!(
                rows_read = summary.rows_read,
                published = summary.published,
                skipped = summary.skipped,
                "All NFL data has been processed"
            );
        }

        Ok(summary)
    }
}
