//! Configuration management
//!
//! Every setting is read once at startup from the environment and carried
//! in plain config structs that are
//! passed to the components that need them. Unset or unparseable values fall
//! back to the `DEFAULT_*` constants below.
//!
//! Binaries call [`load_dotenv`] first thing, so a `.env` file feeds the
//! logging setup as well as the structs here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Broker Configuration Constants
// ============================================================================

/// Default RabbitMQ host.
pub const DEFAULT_RABBITMQ_HOST: &str = "localhost";

/// Default RabbitMQ AMQP port.
pub const DEFAULT_RABBITMQ_PORT: u16 = 5672;

/// Default RabbitMQ user.
pub const DEFAULT_RABBITMQ_USER: &str = "guest";

/// Default RabbitMQ password.
pub const DEFAULT_RABBITMQ_PASS: &str = "guest";

/// Default RabbitMQ virtual host.
pub const DEFAULT_RABBITMQ_VHOST: &str = "/";

/// Default AMQP heartbeat in seconds (10 minutes).
pub const DEFAULT_RABBITMQ_HEARTBEAT_SECS: u16 = 600;

/// Default queue shared by the ingestor and the processor.
pub const DEFAULT_QUEUE_NAME: &str = "game_events";

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default PostgreSQL host.
pub const DEFAULT_DB_HOST: &str = "localhost";

/// Default PostgreSQL port.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default database name.
pub const DEFAULT_DB_NAME: &str = "nfl_analytics";

/// Default database user.
pub const DEFAULT_DB_USER: &str = "postgres";

/// Default database password.
pub const DEFAULT_DB_PASS: &str = "password";

/// Default pool size. The processor writes one record at a time.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 1;

// ============================================================================
// Service Configuration Constants
// ============================================================================

/// Default input file for the ingestor.
pub const DEFAULT_DATA_FILE: &str = "/app/data/nfl_basic.csv";

/// Default pause between publishes, in seconds.
pub const DEFAULT_INGESTOR_INTERVAL_SECS: u64 = 5;

/// RabbitMQ connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub heartbeat_secs: u16,
    pub queue: String,
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

/// Settings specific to the ingestor service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestorConfig {
    pub broker: BrokerConfig,
    pub data_file: PathBuf,
    pub publish_interval_secs: u64,
}

/// Settings specific to the processor service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,
    /// Queue for records whose storage write failed; `None` drops them
    pub dead_letter_queue: Option<String>,
    pub run_migrations: bool,
}

/// Read an environment variable, falling back to `default` when unset or unparseable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl BrokerConfig {
    /// Load broker settings from `RABBITMQ_*` environment variables
    pub fn from_env() -> Self {
        Self {
            host: env_string("RABBITMQ_HOST", DEFAULT_RABBITMQ_HOST),
            port: env_or("RABBITMQ_PORT", DEFAULT_RABBITMQ_PORT),
            user: env_string("RABBITMQ_USER", DEFAULT_RABBITMQ_USER),
            password: env_string("RABBITMQ_PASS", DEFAULT_RABBITMQ_PASS),
            vhost: env_string("RABBITMQ_VHOST", DEFAULT_RABBITMQ_VHOST),
            heartbeat_secs: env_or("RABBITMQ_HEARTBEAT", DEFAULT_RABBITMQ_HEARTBEAT_SECS),
            queue: env_string("RABBITMQ_QUEUE", DEFAULT_QUEUE_NAME),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("RabbitMQ host cannot be empty"));
        }
        if self.port == 0 {
            return Err(Error::config("RabbitMQ port must be greater than 0"));
        }
        if self.queue.trim().is_empty() {
            return Err(Error::config("Queue name cannot be empty"));
        }
        Ok(())
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RABBITMQ_HOST.to_string(),
            port: DEFAULT_RABBITMQ_PORT,
            user: DEFAULT_RABBITMQ_USER.to_string(),
            password: DEFAULT_RABBITMQ_PASS.to_string(),
            vhost: DEFAULT_RABBITMQ_VHOST.to_string(),
            heartbeat_secs: DEFAULT_RABBITMQ_HEARTBEAT_SECS,
            queue: DEFAULT_QUEUE_NAME.to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Load database settings from `DB_*` environment variables
    pub fn from_env() -> Self {
        Self {
            host: env_string("DB_HOST", DEFAULT_DB_HOST),
            port: env_or("DB_PORT", DEFAULT_DB_PORT),
            name: env_string("DB_NAME", DEFAULT_DB_NAME),
            user: env_string("DB_USER", DEFAULT_DB_USER),
            password: env_string("DB_PASS", DEFAULT_DB_PASS),
            max_connections: env_or("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("Database host cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::config("Database name cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(Error::config("Database max_connections must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_DB_HOST.to_string(),
            port: DEFAULT_DB_PORT,
            name: DEFAULT_DB_NAME.to_string(),
            user: DEFAULT_DB_USER.to_string(),
            password: DEFAULT_DB_PASS.to_string(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

/// Load an optional `.env` file into the process environment
///
/// Variables already set in the environment keep their values. Returns the
/// path of the file that was loaded, if any.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

impl IngestorConfig {
    /// Load ingestor configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let config = Self {
            broker: BrokerConfig::from_env(),
            data_file: PathBuf::from(env_string("NFL_DATA_FILE", DEFAULT_DATA_FILE)),
            publish_interval_secs: env_or("INGESTOR_INTERVAL", DEFAULT_INGESTOR_INTERVAL_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        if self.data_file.as_os_str().is_empty() {
            return Err(Error::config("Data file path cannot be empty"));
        }
        Ok(())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs)
    }
}

impl ProcessorConfig {
    /// Load processor configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let config = Self {
            broker: BrokerConfig::from_env(),
            database: DatabaseConfig::from_env(),
            dead_letter_queue: std::env::var("DEAD_LETTER_QUEUE")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            run_migrations: env_or("RUN_MIGRATIONS", true),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        self.database.validate()?;

        if self.dead_letter_queue.as_deref() == Some(self.broker.queue.as_str()) {
            return Err(Error::config(format!(
                "Dead-letter queue cannot be the consumed queue '{}'",
                self.broker.queue
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::logging::{LogConfig, LogFormat, LogLevel};
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_default_broker_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5672);
        assert_eq!(config.queue, "game_events");
        assert_eq!(config.heartbeat_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_broker_config_from_env() {
        std::env::set_var("RABBITMQ_HOST", "rabbit.internal");
        std::env::set_var("RABBITMQ_PORT", "5673");
        std::env::set_var("RABBITMQ_QUEUE", "nfl_games");

        let config = BrokerConfig::from_env();
        assert_eq!(config.host, "rabbit.internal");
        assert_eq!(config.port, 5673);
        assert_eq!(config.queue, "nfl_games");

        std::env::remove_var("RABBITMQ_HOST");
        std::env::remove_var("RABBITMQ_PORT");
        std::env::remove_var("RABBITMQ_QUEUE");
    }

    #[test]
    #[serial]
    fn test_unparseable_value_falls_back_to_default() {
        std::env::set_var("DB_PORT", "not-a-port");
        let config = DatabaseConfig::from_env();
        assert_eq!(config.port, DEFAULT_DB_PORT);
        std::env::remove_var("DB_PORT");
    }

    #[test]
    fn test_validate_rejects_empty_queue() {
        let config = BrokerConfig {
            queue: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dead_letter_queue_must_differ() {
        let config = ProcessorConfig {
            broker: BrokerConfig::default(),
            database: DatabaseConfig::default(),
            dead_letter_queue: Some(DEFAULT_QUEUE_NAME.to_string()),
            run_migrations: true,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_database_pool_size_must_be_positive() {
        let config = DatabaseConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_file_feeds_logging_config() {
        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("LOG_FORMAT");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "LOG_LEVEL=warn").unwrap();
        writeln!(file, "LOG_FORMAT=json").unwrap();

        dotenvy::from_path(file.path()).unwrap();
        let config = LogConfig::from_env().unwrap();

        assert_eq!(config.level, LogLevel::Warn);
        assert_eq!(config.format, LogFormat::Json);

        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("LOG_FORMAT");
    }
}
