//! RabbitMQ connection plumbing shared by publisher and consumer
//!
//! Both sides declare the same queue with the same options, so whichever
//! service starts first creates it and the other's declaration is a no-op.

use async_trait::async_trait;
use lapin::options::QueueDeclareOptions;
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::connector::Connect;

/// AMQP reply code for a normal close
const REPLY_SUCCESS: u16 = 200;

/// Opens RabbitMQ connections for the [`Reconnector`](crate::connector::Reconnector)
#[derive(Debug, Clone)]
pub struct BrokerConnector {
    config: BrokerConfig,
    connection_name: String,
}

impl BrokerConnector {
    /// `connection_name` is shown in the RabbitMQ management UI
    pub fn new(config: BrokerConfig, connection_name: impl Into<String>) -> Self {
        Self {
            config,
            connection_name: connection_name.into(),
        }
    }

    fn uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.config.user.clone(),
                    password: self.config.password.clone(),
                },
                host: self.config.host.clone(),
                port: self.config.port,
            },
            vhost: self.config.vhost.clone(),
            query: AMQPQueryString {
                heartbeat: Some(self.config.heartbeat_secs),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[async_trait]
impl Connect for BrokerConnector {
    type Connection = Connection;

    fn target(&self) -> String {
        format!("RabbitMQ at {}:{}", self.config.host, self.config.port)
    }

    async fn connect(&self) -> anyhow::Result<Connection> {
        let properties =
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into());
        let connection = Connection::connect_uri(self.uri(), properties).await?;
        Ok(connection)
    }
}

/// Declare `queue` as durable; creates it if absent, no-op if it already exists
pub async fn declare_durable_queue(channel: &Channel, queue: &str) -> lapin::Result<()> {
    let declared = channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    debug!(
        queue = %queue,
        messages = declared.message_count(),
        consumers = declared.consumer_count(),
        "Queue declared"
    );
    Ok(())
}

/// Close a broker connection, logging rather than failing on error
pub async fn close_connection(connection: &Connection) {
    match connection.close(REPLY_SUCCESS, "service shutdown").await {
        Ok(()) => info!("RabbitMQ connection closed"),
        Err(e) => warn!(error = %e, "Error while closing RabbitMQ connection"),
    }
}
