//! Queue publisher
//!
//! Every publish re-declares the durable queue before sending, so the
//! ingestor never depends on the processor having created it first.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::{BasicProperties, Channel, Connection};
use nfl_common::broker::declare_durable_queue;
use nfl_common::message::{self, CONTENT_TYPE};
use nfl_common::GameRecord;
use thiserror::Error;
use tracing::{debug, error, info};

/// AMQP delivery mode for messages that survive a broker restart
const PERSISTENT: u8 = 2;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode game {game_id}: {source}")]
    Encode {
        game_id: i64,
        source: serde_json::Error,
    },

    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Broker did not accept the message for queue '{queue}'")]
    Nacked { queue: String },
}

/// The broker operations the publisher needs
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Declare `queue` as durable; a no-op if it already exists
    async fn declare_durable(&self, queue: &str) -> Result<(), PublishError>;

    /// Send a persistent JSON message to `queue` through the default exchange
    async fn send_persistent(&self, queue: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

/// [`QueueTransport`] over a RabbitMQ channel with publisher confirms
pub struct AmqpTransport {
    channel: Channel,
}

impl AmqpTransport {
    /// Open a channel on `connection` and put it into confirm mode
    pub async fn open(connection: &Connection) -> Result<Self, PublishError> {
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        debug!(channel_id = channel.id(), "Publisher channel opened in confirm mode");
        Ok(Self { channel })
    }
}

#[async_trait]
impl QueueTransport for AmqpTransport {
    async fn declare_durable(&self, queue: &str) -> Result<(), PublishError> {
        declare_durable_queue(&self.channel, queue).await?;
        Ok(())
    }

    async fn send_persistent(&self, queue: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type(CONTENT_TYPE.into());

        let confirmation = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), &payload, properties)
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(PublishError::Nacked {
                queue: queue.to_string(),
            });
        }
        Ok(())
    }
}

/// Publish one record to `queue`
///
/// Declares the queue, encodes the record and sends it as a persistent
/// message. Failures are logged and returned; there is no retry here.
pub async fn publish<T>(transport: &T, queue: &str, record: &GameRecord) -> Result<(), PublishError>
where
    T: QueueTransport + ?Sized,
{
    let result = send(transport, queue, record).await;

    match &result {
        Ok(()) => info!(
            game_id = record.game_id,
            matchup = %record.matchup(),
            queue = %queue,
            "Published game data"
        ),
        Err(e) => error!(game_id = record.game_id, queue = %queue, error = %e, "Failed to publish message"),
    }

    result
}

async fn send<T>(transport: &T, queue: &str, record: &GameRecord) -> Result<(), PublishError>
where
    T: QueueTransport + ?Sized,
{
    transport.declare_durable(queue).await?;

    let payload = message::encode(record).map_err(|source| PublishError::Encode {
        game_id: record.game_id,
        source,
    })?;

    transport.send_persistent(queue, payload).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use nfl_common::record::{columns, parse, RawRow};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedTransport {
        declared: Mutex<Vec<String>>,
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        nack: bool,
    }

    #[async_trait]
    impl QueueTransport for ScriptedTransport {
        async fn declare_durable(&self, queue: &str) -> Result<(), PublishError> {
            self.declared.lock().unwrap().push(queue.to_string());
            Ok(())
        }

        async fn send_persistent(&self, queue: &str, payload: Vec<u8>) -> Result<(), PublishError> {
            if self.nack {
                return Err(PublishError::Nacked {
                    queue: queue.to_string(),
                });
            }
            self.sent.lock().unwrap().push((queue.to_string(), payload));
            Ok(())
        }
    }

    fn record() -> GameRecord {
        let row: RawRow = [
            (columns::GAME_ID, "5001"),
            (columns::DATE, "20230910"),
            (columns::AWAY_TEAM, "Bills"),
            (columns::HOME_TEAM, "Jets"),
        ]
        .into_iter()
        .collect();
        parse(&row).unwrap()
    }

    #[tokio::test]
    async fn test_declares_before_sending() {
        let transport = ScriptedTransport::default();
        publish(&transport, "game_events", &record()).await.unwrap();
        publish(&transport, "game_events", &record()).await.unwrap();

        assert_eq!(*transport.declared.lock().unwrap(), vec!["game_events", "game_events"]);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "game_events");
        assert_eq!(message::decode(&sent[0].1).unwrap().game_id, 5001);
    }

    #[tokio::test]
    async fn test_nack_is_returned() {
        let transport = ScriptedTransport {
            nack: true,
            ..Default::default()
        };
        let err = publish(&transport, "game_events", &record()).await.unwrap_err();
        assert!(matches!(err, PublishError::Nacked { .. }));
    }
}
