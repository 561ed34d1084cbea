//! NFL Ingestor - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use nfl_common::broker::{close_connection, BrokerConnector};
use nfl_common::config::{load_dotenv, IngestorConfig};
use nfl_common::connector::{ConnectError, Reconnector};
use nfl_common::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use nfl_common::shutdown::spawn_shutdown_watcher;
use nfl_ingestor::{open_rows, AmqpTransport, Ingestor};
use std::path::PathBuf;
use tracing::{debug, info, info_span, Instrument};

const SERVICE_NAME: &str = "nfl-ingestor";

/// Publish NFL game rows from a CSV file to RabbitMQ
#[derive(Parser, Debug)]
#[command(name = "nfl-ingestor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// CSV file to ingest (overrides NFL_DATA_FILE)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Seconds to wait after each publish (overrides INGESTOR_INTERVAL)
    #[arg(long)]
    interval: Option<u64>,

    /// Queue to publish to (overrides RABBITMQ_QUEUE)
    #[arg(long)]
    queue: Option<String>,

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
        .filter_directives("lapin=warn")
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
    info!("NFL Ingestor service starting up");

    let mut config = IngestorConfig::load()?;
    if let Some(file) = cli.file {
        config.data_file = file;
    }
    if let Some(interval) = cli.interval {
        config.publish_interval_secs = interval;
    }
    if let Some(queue) = cli.queue {
        config.broker.queue = queue;
    }
    config.validate()?;

    info!(
        queue = %config.broker.queue,
        interval_secs = config.publish_interval_secs,
        file = %config.data_file.display(),
        "Configuration loaded"
    );

    // A missing input file is fatal; find out before waiting on the broker
    let rows = open_rows(&config.data_file)?;

    let shutdown = spawn_shutdown_watcher();
    let mut reconnector =
        Reconnector::new(BrokerConnector::new(config.broker.clone(), SERVICE_NAME));
    let connection = match reconnector.connect(&shutdown).await {
        Ok(connection) => connection,
        Err(ConnectError::Cancelled { .. }) => {
            info!("NFL Ingestor service shutdown complete");
            return Ok(());
        },
    };

    let result = async {
        let transport = AmqpTransport::open(&connection)
            .await
            .context("Failed to open publisher channel")?;
        let ingestor = Ingestor::new(transport, config.broker.queue.clone(), config.publish_interval());
        let summary = ingestor.run(rows, &shutdown).await?;
        Ok::<_, anyhow::Error>(summary)
    }
    .await;

    close_connection(&connection).await;

    let summary = result?;
    info!(
        published = summary.published,
        skipped = summary.skipped,
        "NFL Ingestor service shutdown complete"
    );
    Ok(())
}
