//! Queue consumer
//!
//! Deliveries are handled strictly one at a time: decode, store, then
//! acknowledge, before the next delivery is pulled. With a prefetch of one
//! the broker holds every other message until the current one is settled.
//!
//! | Outcome                 | Disposition                                  |
//! |-------------------------|----------------------------------------------|
//! | decode failure          | reject, no requeue                           |
//! | stored                  | ack                                          |
//! | storage failure         | dead-letter if configured, then reject       |

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use nfl_common::broker::declare_durable_queue;
use nfl_common::message;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dead_letter::DeadLetterSink;
use crate::storage::GameStore;

/// Unacknowledged deliveries the broker may push to this consumer
pub const PREFETCH_COUNT: u16 = 1;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// The delivery stream failed mid-run; `stats` covers what was settled before it
    #[error("Delivery stream failed: {source}")]
    Stream {
        stats: ConsumerStats,
        #[source]
        source: lapin::Error,
    },
}

impl ConsumerError {
    /// Counters accumulated before the failure
    pub fn partial_stats(&self) -> ConsumerStats {
        match self {
            Self::Broker(_) => ConsumerStats::default(),
            Self::Stream { stats, .. } => *stats,
        }
    }
}

/// One delivery as seen by the consumer loop
#[async_trait]
pub trait InboundMessage: Send + Sync {
    fn payload(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    fn redelivered(&self) -> bool;

    async fn ack(&self) -> Result<(), lapin::Error>;

    /// Negative acknowledgement without requeue
    async fn reject(&self) -> Result<(), lapin::Error>;
}

#[async_trait]
impl InboundMessage for Delivery {
    fn payload(&self) -> &[u8] {
        &self.data
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.redelivered
    }

    async fn ack(&self) -> Result<(), lapin::Error> {
        self.acker.ack(BasicAckOptions::default()).await
    }

    async fn reject(&self) -> Result<(), lapin::Error> {
        self.acker
            .nack(BasicNackOptions {
                requeue: false,
                multiple: false,
            })
            .await
    }
}

/// What to do with a delivery once it has been handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject,
    DeadLetter { reason: String },
}

/// Counters for one consumer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub rejected: u64,
    pub dead_lettered: u64,
    /// Acks or rejects the broker did not take
    pub settle_failures: u64,
}

impl std::ops::AddAssign for ConsumerStats {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.acked += other.acked;
        self.rejected += other.rejected;
        self.dead_lettered += other.dead_lettered;
        self.settle_failures += other.settle_failures;
    }
}

/// Routes deliveries into a [`GameStore`]
pub struct Consumer<S> {
    store: S,
    dead_letter: Option<Box<dyn DeadLetterSink>>,
}

impl<S: GameStore> Consumer<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            dead_letter: None,
        }
    }

    /// Send storage failures to `sink` instead of dropping them
    pub fn with_dead_letter(mut self, sink: Box<dyn DeadLetterSink>) -> Self {
        self.dead_letter = Some(sink);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decode and store one delivery, deciding how it must be settled
    pub async fn handle<M: InboundMessage + ?Sized>(&self, delivery: &M) -> Disposition {
        let delivery_tag = delivery.delivery_tag();

        let record = match message::decode(delivery.payload()) {
            Ok(record) => record,
            Err(e) => {
                error!(delivery_tag, error = %e, "Failed to decode message, rejecting");
                return Disposition::Reject;
            },
        };

        match self.store.upsert(&record).await {
            Ok(outcome) => {
                info!(
                    game_id = record.game_id,
                    matchup = %record.matchup(),
                    ?outcome,
                    redelivered = delivery.redelivered(),
                    "Stored game data"
                );
                Disposition::Ack
            },
            Err(e) => {
                error!(game_id = record.game_id, delivery_tag, error = %e, "Failed to store game data");
                if self.dead_letter.is_some() {
                    Disposition::DeadLetter {
                        reason: e.to_string(),
                    }
                } else {
                    Disposition::Reject
                }
            },
        }
    }

    /// Handle and settle one delivery
    pub async fn process<M: InboundMessage + ?Sized>(&self, delivery: &M, stats: &mut ConsumerStats) {
        stats.received += 1;
        let delivery_tag = delivery.delivery_tag();

        match self.handle(delivery).await {
            Disposition::Ack => match delivery.ack().await {
                Ok(()) => stats.acked += 1,
                Err(e) => {
                    stats.settle_failures += 1;
                    warn!(delivery_tag, error = %e, "Failed to ack message");
                },
            },
            Disposition::Reject => self.reject(delivery, stats).await,
            Disposition::DeadLetter { reason } => {
                if let Some(sink) = &self.dead_letter {
                    match sink.send(delivery.payload(), &reason).await {
                        Ok(()) => {
                            stats.dead_lettered += 1;
                            info!(delivery_tag, queue = sink.queue(), "Message dead-lettered");
                        },
                        Err(e) => error!(
                            delivery_tag,
                            queue = sink.queue(),
                            error = %e,
                            "Failed to dead-letter message, dropping it"
                        ),
                    }
                }
                self.reject(delivery, stats).await;
            },
        }
    }

    async fn reject<M: InboundMessage + ?Sized>(&self, delivery: &M, stats: &mut ConsumerStats) {
        let delivery_tag = delivery.delivery_tag();
        match delivery.reject().await {
            Ok(()) => {
                stats.rejected += 1;
                debug!(delivery_tag, "Message rejected without requeue");
            },
            Err(e) => {
                stats.settle_failures += 1;
                warn!(delivery_tag, error = %e, "Failed to reject message");
            },
        }
    }

    /// Consume until shutdown is requested or the stream ends
    ///
    /// Cancellation is only observed between deliveries, so the message in
    /// hand is always stored and settled first. A broker error on the
    /// stream ends the run with [`ConsumerError::Stream`], which keeps the
    /// counters gathered so far.
    pub async fn run<M, St>(&self, deliveries: St, shutdown: &CancellationToken) -> Result<ConsumerStats, ConsumerError>
    where
        M: InboundMessage,
        St: Stream<Item = Result<M, lapin::Error>>,
    {
        let mut stats = ConsumerStats::default();
        tokio::pin!(deliveries);

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping consumer");
                    break;
                },
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.process(&delivery, &mut stats).await,
                Some(Err(source)) => {
                    error!(error = %source, received = stats.received, "Delivery stream failed");
                    return Err(ConsumerError::Stream { stats, source });
                },
                None => {
                    info!("Delivery stream closed");
                    break;
                },
            }
        }

        info!(
            received = stats.received,
            acked = stats.acked,
            rejected = stats.rejected,
            dead_lettered = stats.dead_lettered,
            "Consumer stopped"
        );
        Ok(stats)
    }
}

/// Declare `queue`, limit prefetch to one and start consuming
pub async fn start_consuming(channel: &Channel, queue: &str) -> Result<lapin::Consumer, ConsumerError> {
    declare_durable_queue(channel, queue).await?;

    channel
        .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
        .await?;

    let consumer_tag = format!("nfl-processor-{}", Uuid::new_v4());
    let consumer = channel
        .basic_consume(
            queue,
            &consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(queue = %queue, consumer_tag = %consumer_tag, "Waiting for messages");
    Ok(consumer)
}
