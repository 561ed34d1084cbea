//! Dead-letter sink for records the database refused
//!
//! Only storage failures are dead-lettered. Payloads that cannot be decoded
//! are rejected outright: there is nothing useful to replay.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection};
use nfl_common::broker::declare_durable_queue;
use nfl_common::message::CONTENT_TYPE;
use thiserror::Error;

/// Header naming why the record was dead-lettered
pub const FAILURE_REASON_HEADER: &str = "x-failure-reason";

/// Header naming the queue the record was consumed from
pub const ORIGINAL_QUEUE_HEADER: &str = "x-original-queue";

const PERSISTENT: u8 = 2;

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Broker did not accept the dead letter for queue '{queue}'")]
    Nacked { queue: String },
}

/// Destination for payloads whose storage write failed
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Queue name, for diagnostics
    fn queue(&self) -> &str;

    async fn send(&self, payload: &[u8], reason: &str) -> Result<(), DeadLetterError>;
}

/// [`DeadLetterSink`] publishing to a durable RabbitMQ queue
pub struct AmqpDeadLetter {
    channel: Channel,
    queue: String,
    source_queue: String,
}

impl AmqpDeadLetter {
    /// Open a dedicated confirm-mode channel and declare `queue`
    pub async fn open(
        connection: &Connection,
        queue: impl Into<String>,
        source_queue: impl Into<String>,
    ) -> Result<Self, DeadLetterError> {
        let queue = queue.into();
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        declare_durable_queue(&channel, &queue).await?;

        Ok(Self {
            channel,
            queue,
            source_queue: source_queue.into(),
        })
    }
}

/// Headers attached to every dead letter
pub fn failure_headers(reason: &str, source_queue: &str) -> FieldTable {
    let mut headers = FieldTable::default();
    headers.insert(
        FAILURE_REASON_HEADER.into(),
        AMQPValue::LongString(reason.into()),
    );
    headers.insert(
        ORIGINAL_QUEUE_HEADER.into(),
        AMQPValue::LongString(source_queue.into()),
    );
    headers
}

#[async_trait]
impl DeadLetterSink for AmqpDeadLetter {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn send(&self, payload: &[u8], reason: &str) -> Result<(), DeadLetterError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(CONTENT_TYPE.into())
            .with_headers(failure_headers(reason, &self.source_queue));

        let confirmation = self
            .channel
            .basic_publish("", &self.queue, BasicPublishOptions::default(), payload, properties)
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(DeadLetterError::Nacked {
                queue: self.queue.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    #[test]
    fn test_failure_headers() {
        let headers = failure_headers("check constraint violated", "game_events");
        let inner = headers.inner();

        assert_eq!(inner.len(), 2);
        assert_eq!(
            inner.get(&ShortString::from(FAILURE_REASON_HEADER)),
            Some(&AMQPValue::LongString("check constraint violated".into()))
        );
        assert_eq!(
            inner.get(&ShortString::from(ORIGINAL_QUEUE_HEADER)),
            Some(&AMQPValue::LongString("game_events".into()))
        );
    }
}
