use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// [Redis] backed store, one multiplexed connection per worker.
///
/// [Redis]: https://redis.io/docs/latest/commands/set/
pub mod redis;

/// In-process store with fault injection and lifecycle counters.
pub mod memory;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("connect - {0}")]
    Connect(String),

    #[error("command - {0}")]
    Command(String),

    /// The connection is gone for good; only a new connection can make progress.
    #[error("disconnected - {0}")]
    Disconnected(String),

    #[error("close - {0}")]
    Close(String),
}

/// Network address of the store, known only after deferred parameters are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens connections to a store. Cloned into every worker; holds no per-connection state.
#[trait_variant::make(Connector: Send)]
#[allow(dead_code)]
pub trait LocalConnector {
    type Connection: Connection;

    async fn connect(&self, endpoint: &Endpoint) -> StoreResult<Self::Connection>;
}

/// An open channel to the store, owned by exactly one worker.
#[trait_variant::make(Connection: Send)]
#[allow(dead_code)]
pub trait LocalConnection {
    /// `SET key value`.
    async fn set(&mut self, key: &str, value: &str) -> StoreResult<()>;

    /// `GET key`.
    async fn get(&mut self, key: &str) -> StoreResult<Option<String>>;

    /// Releases the connection. Consumes it, so a connection can only be closed once.
    async fn close(self) -> StoreResult<()>;
}
