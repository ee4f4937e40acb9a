use redis::{AsyncCommands, RedisError};
use redis::aio::MultiplexedConnection;
use tracing::debug;

use super::{Connection, Connector, Endpoint, StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self, endpoint: &Endpoint) -> StoreResult<RedisConnection> {
        let url = format!("redis://{}:{}/", endpoint.host, endpoint.port);
        let client = redis::Client::open(url.as_str())
            .map_err(|e| StoreError::Connect(format!("Creating Redis client for {endpoint}: {e:?}")))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connect(format!("Connecting to Redis at {endpoint}: {e:?}")))?;
        debug!(%endpoint, "Connected to Redis");
        Ok(RedisConnection {
            conn,
            endpoint: endpoint.clone(),
        })
    }
}

pub struct RedisConnection {
    conn: MultiplexedConnection,
    endpoint: Endpoint,
}

impl Connection for RedisConnection {
    async fn set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.conn
            .set::<_, _, ()>(key, value)
            .await
            .map_err(|e| command_error(e, format!("SET {key} on {}", self.endpoint)))
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        self.conn
            .get::<_, Option<String>>(key)
            .await
            .map_err(|e| command_error(e, format!("GET {key} on {}", self.endpoint)))
    }

    async fn close(self) -> StoreResult<()> {
        // the multiplexed connection shuts its driver task down once the last handle is dropped
        drop(self.conn);
        debug!(endpoint = %self.endpoint, "Closed Redis connection");
        Ok(())
    }
}

/// A multiplexed connection does not reconnect; once its socket is gone every later command
/// fails the same way.
fn command_error(err: RedisError, context: String) -> StoreError {
    if err.is_connection_dropped() || err.is_io_error() {
        StoreError::Disconnected(format!("{context}: {err:?}"))
    } else {
        StoreError::Command(format!("{context}: {err:?}"))
    }
}
