//! Resilient connection establishment
//!
//! Both services depend on two external systems (RabbitMQ, PostgreSQL) that
//! may come up after the service does. Connecting is modelled as a small
//! state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     |   ^
//!                     v   |
//!                    Backoff
//! ```
//!
//! Failures wait for a delay that starts at one second and doubles up to a
//! sixty second ceiling. There is no attempt limit: a dependency that never
//! comes up blocks startup until the process is asked to shut down.
//!
//! Time is injected through [`Sleeper`] so tests can drive the machine
//! without real delays.
//!
//! # Example
//!
//! ```
//! use nfl_common::connector::Backoff;
//! use std::time::Duration;
//!
//! let mut backoff = Backoff::default();
//! let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
//! assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
//! ```

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// First delay after a failed attempt.
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Ceiling for the retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Capped exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial.min(max),
        }
    }

    /// Delay to wait now; advances the sequence for the next failure
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Restart the sequence from the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(INITIAL_RETRY_DELAY, MAX_RETRY_DELAY)
    }
}

/// Reconnect state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Connected,
}

/// Something that can open a connection to an external endpoint
#[async_trait]
pub trait Connect: Send + Sync {
    type Connection: Send;

    /// Endpoint description for diagnostics, e.g. `"rabbitmq at localhost:5672"`
    fn target(&self) -> String;

    /// Make a single connection attempt
    async fn connect(&self) -> anyhow::Result<Self::Connection>;
}

/// Injected sleep, so retry timing can be simulated in tests
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Connection to {target} abandoned: shutdown requested")]
    Cancelled { target: String },
}

/// Drives a [`Connect`] implementation until it succeeds or shutdown is requested
pub struct Reconnector<C, S = TokioSleeper> {
    connector: C,
    sleeper: S,
    backoff: Backoff,
    state: ConnectionState,
}

impl<C: Connect> Reconnector<C, TokioSleeper> {
    pub fn new(connector: C) -> Self {
        Self::with_sleeper(connector, TokioSleeper)
    }
}

impl<C: Connect, S: Sleeper> Reconnector<C, S> {
    pub fn with_sleeper(connector: C, sleeper: S) -> Self {
        Self {
            connector,
            sleeper,
            backoff: Backoff::default(),
            state: ConnectionState::Disconnected,
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Mark the connection as lost so the next [`connect`](Self::connect) starts fresh
    pub fn disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.backoff.reset();
    }

    /// Connect, retrying forever with capped exponential backoff
    ///
    /// Returns only on success, or with [`ConnectError::Cancelled`] once
    /// `shutdown` fires during an attempt or a backoff wait.
    pub async fn connect(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<C::Connection, ConnectError> {
        let target = self.connector.target();
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            self.state = ConnectionState::Connecting { attempt };
            info!(endpoint = %target, attempt, "Attempting to connect");

            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                result = self.connector.connect() => Some(result),
            };

            match result {
                None => return Err(self.cancelled(target)),
                Some(Ok(connection)) => {
                    self.state = ConnectionState::Connected;
                    self.backoff.reset();
                    info!(endpoint = %target, attempt, "Connected");
                    return Ok(connection);
                },
                Some(Err(e)) => {
                    let delay = self.backoff.next_delay();
                    self.state = ConnectionState::Backoff { attempt, delay };
                    error!(endpoint = %target, attempt, error = %format!("{e:#}"), "Connection attempt failed");
                    info!(endpoint = %target, delay_secs = delay.as_secs(), "Retrying after backoff");

                    let cancelled = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => true,
                        _ = self.sleeper.sleep(delay) => false,
                    };
                    if cancelled {
                        return Err(self.cancelled(target));
                    }
                },
            }
        }
    }

    fn cancelled(&mut self, target: String) -> ConnectError {
        self.state = ConnectionState::Disconnected;
        info!(endpoint = %target, "Shutdown requested, giving up on connection");
        ConnectError::Cancelled { target }
    }
}
