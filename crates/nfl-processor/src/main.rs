//! NFL Processor - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use lapin::{Channel, Connection};
use nfl_common::broker::{close_connection, BrokerConnector};
use nfl_common::config::{load_dotenv, ProcessorConfig};
use nfl_common::connector::{Backoff, ConnectError, Reconnector};
use nfl_common::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use nfl_common::shutdown::spawn_shutdown_watcher;
use nfl_processor::db::{self, DatabaseConnector};
use nfl_processor::{start_consuming, AmqpDeadLetter, Consumer, ConsumerStats, PgGameStore};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

const SERVICE_NAME: &str = "nfl-processor";

/// Consume NFL game messages from RabbitMQ into PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "nfl-processor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Queue to consume from (overrides RABBITMQ_QUEUE)
    #[arg(long)]
    queue: Option<String>,

    /// Queue for records the database refused (overrides DEAD_LETTER_QUEUE)
    #[arg(long)]
    dead_letter_queue: Option<String>,

    /// Do not apply database migrations at startup
    #[arg(long)]
    skip_migrations: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env_file = load_dotenv();

    // Environment variables take precedence over these defaults, --verbose over both
    let mut log_config = LogConfig::builder()
        .format(LogFormat::Json)
        .log_file_prefix(SERVICE_NAME)
        .filter_directives("lapin=warn,sqlx=warn")
        .build()
        .merge_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let _log_guard = init_logging(&log_config)?;

    if let Some(path) = env_file {
        debug!(path = %path.display(), "Loaded environment file");
    }

    run(cli)
        .instrument(info_span!("service", service_name = SERVICE_NAME))
        .await
}

async fn run(cli: Cli) -> Result<()> {
    info!("NFL Processor service starting up");

    let mut config = ProcessorConfig::load()?;
    if let Some(queue) = cli.queue {
        config.broker.queue = queue;
    }
    if let Some(dead_letter_queue) = cli.dead_letter_queue {
        config.dead_letter_queue = Some(dead_letter_queue);
    }
    if cli.skip_migrations {
        config.run_migrations = false;
    }
    config.validate()?;

    info!(
        queue = %config.broker.queue,
        dead_letter_queue = config.dead_letter_queue.as_deref().unwrap_or("none"),
        run_migrations = config.run_migrations,
        "Configuration loaded"
    );

    let shutdown = spawn_shutdown_watcher();

    let mut database = Reconnector::new(DatabaseConnector::new(config.database.clone()));
    let pool = match database.connect(&shutdown).await {
        Ok(pool) => pool,
        Err(ConnectError::Cancelled { .. }) => {
            info!("NFL Processor service shutdown complete");
            return Ok(());
        },
    };

    if config.run_migrations {
        db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;
        info!("Database migrations completed");
    }

    let totals = consume_until_shutdown(&config, &pool, &shutdown).await;

    pool.close().await;
    info!("PostgreSQL connection pool closed");

    info!(
        received = totals.received,
        acked = totals.acked,
        rejected = totals.rejected,
        dead_lettered = totals.dead_lettered,
        "NFL Processor service shutdown complete"
    );
    Ok(())
}

/// Consume in broker sessions, reconnecting whenever a session ends before shutdown
async fn consume_until_shutdown(
    config: &ProcessorConfig,
    pool: &PgPool,
    shutdown: &CancellationToken,
) -> ConsumerStats {
    let mut broker = Reconnector::new(BrokerConnector::new(config.broker.clone(), SERVICE_NAME));
    let mut session_backoff = Backoff::default();
    let mut totals = ConsumerStats::default();

    loop {
        let connection = match broker.connect(shutdown).await {
            Ok(connection) => connection,
            Err(ConnectError::Cancelled { .. }) => break,
        };

        let (stats, outcome) = consume_session(&connection, config, pool, shutdown).await;
        close_connection(&connection).await;
        broker.disconnected();
        totals += stats;

        match outcome {
            Ok(()) => {
                session_backoff.reset();
                if shutdown.is_cancelled() {
                    break;
                }
                warn!("Delivery stream ended, reconnecting");
            },
            Err(e) => {
                if shutdown.is_cancelled() {
                    break;
                }
                let delay = session_backoff.next_delay();
                error!(
                    error = %format!("{e:#}"),
                    delay_secs = delay.as_secs(),
                    "Consumer session failed, reconnecting after backoff"
                );

                let cancelled = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if cancelled {
                    break;
                }
            },
        }
    }

    totals
}

/// One broker session; the stats are returned even when the session fails
async fn consume_session(
    connection: &Connection,
    config: &ProcessorConfig,
    pool: &PgPool,
    shutdown: &CancellationToken,
) -> (ConsumerStats, Result<()>) {
    // The channel is held until the run ends
    let (_channel, consumer, deliveries) = match open_session(connection, config, pool).await {
        Ok(session) => session,
        Err(e) => return (ConsumerStats::default(), Err(e)),
    };

    match consumer.run(deliveries, shutdown).await {
        Ok(stats) => (stats, Ok(())),
        Err(e) => (e.partial_stats(), Err(e.into())),
    }
}

async fn open_session(
    connection: &Connection,
    config: &ProcessorConfig,
    pool: &PgPool,
) -> Result<(Channel, Consumer<PgGameStore>, lapin::Consumer)> {
    let channel = connection
        .create_channel()
        .await
        .context("Failed to open consumer channel")?;

    let mut consumer = Consumer::new(PgGameStore::new(pool.clone()));
    if let Some(queue) = &config.dead_letter_queue {
        let sink = AmqpDeadLetter::open(connection, queue.clone(), config.broker.queue.clone())
            .await
            .context("Failed to open dead-letter channel")?;
        consumer = consumer.with_dead_letter(Box::new(sink));
    }

    let deliveries = start_consuming(&channel, &config.broker.queue).await?;
    Ok((channel, consumer, deliveries))
}
