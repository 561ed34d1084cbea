//! PostgreSQL connection pool
//!
//! The pool is opened through the shared [`Reconnector`](nfl_common::connector::Reconnector)
//! so a database that starts after the processor is waited for, not fatal.

use async_trait::async_trait;
use nfl_common::config::DatabaseConfig;
use nfl_common::connector::Connect;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

/// How long a single attempt may wait for a pooled connection
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Database operation errors with contextual information
#[derive(Error, Debug)]
pub enum DbError {
    /// Schema migration failed
    #[error("Database migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = Result<T, DbError>;

/// Connection options built from discrete settings, so passwords need no URL escaping
pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.name)
        .username(&config.user)
        .password(&config.password)
        .application_name("nfl-processor")
}

/// Opens the processor's connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConnector {
    config: DatabaseConfig,
}

impl DatabaseConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connect for DatabaseConnector {
    type Connection = PgPool;

    fn target(&self) -> String {
        format!(
            "PostgreSQL at {}:{}/{}",
            self.config.host, self.config.port, self.config.name
        )
    }

    async fn connect(&self) -> anyhow::Result<PgPool> {
        // connect_with opens one connection up front, so an unreachable server fails here
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(connect_options(&self.config))
            .await?;

        tracing::info!(
            max_connections = self.config.max_connections,
            "Database connection pool created"
        );

        Ok(pool)
    }
}

/// Apply pending migrations from the workspace `migrations/` directory
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}
