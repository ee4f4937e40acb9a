use std::sync::Arc;

use tracing::{debug, warn};

use crate::deferred::{Deferred, RuntimeParams};
use crate::kvstore::{Connection, Connector, Endpoint, StoreError};
use crate::message::Record;
use crate::pipeline::SinkSpec;
use crate::{Error, Result};

/// Outcome of a single successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub key: String,
    pub bytes: usize,
}

/// SinkResourceManager owns the store connection of one worker.
///
/// The connection is opened in [`setup`](Self::setup), reused by every [`process`](Self::process)
/// call of the bundle, and released in [`teardown`](Self::teardown). Each worker gets its own
/// instance; nothing here is shared between workers.
pub struct SinkResourceManager<C: Connector> {
    worker: usize,
    host: Deferred<String>,
    port: Deferred<u16>,
    params: Arc<RuntimeParams>,
    connector: C,
    connection: Option<C::Connection>,
}

impl<C: Connector> SinkResourceManager<C> {
    pub fn new(worker: usize, sink: &SinkSpec, params: Arc<RuntimeParams>, connector: C) -> Self {
        Self {
            worker,
            host: sink.host.clone(),
            port: sink.port.clone(),
            params,
            connector,
            connection: None,
        }
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Resolves host and port for this worker and opens the connection. A no-op while a
    /// connection is already open, so it is safe to call once per bundle.
    pub async fn setup(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let endpoint = Endpoint::new(
            self.host.resolve(&self.params)?,
            self.port.resolve(&self.params)?,
        );
        let connection = self.connector.connect(&endpoint).await.map_err(|e| {
            Error::Connection(format!("worker={} opening {endpoint}: {e}", self.worker))
        })?;

        debug!(worker = self.worker, %endpoint, "Opened store connection");
        self.connection = Some(connection);
        Ok(())
    }

    /// Writes the record's value under its key on the open connection.
    ///
    /// Never opens connections. Calling it without a prior successful `setup` is a defect and
    /// fails with [`Error::Engine`], which is never retried. A connection the store reports as
    /// lost is released and surfaces as [`Error::Connection`]; any other store failure is an
    /// [`Error::Write`] for this key.
    pub async fn process(&mut self, record: &Record) -> Result<WriteOutcome> {
        let worker = self.worker;
        let connection = self.connection.as_mut().ok_or_else(|| {
            Error::Engine(format!(
                "worker={worker} has no open connection while writing key={}",
                record.key
            ))
        })?;

        let result = connection.set(&record.key, &record.value).await;
        match result {
            Ok(()) => Ok(WriteOutcome {
                key: record.key.clone(),
                bytes: record.value.len(),
            }),
            Err(e @ StoreError::Disconnected(_)) => {
                self.release_lost_connection().await;
                Err(Error::Connection(format!(
                    "worker={worker} lost its connection while writing key={}: {e}",
                    record.key
                )))
            }
            Err(e) => Err(Error::Write {
                worker,
                key: record.key.clone(),
                cause: e.to_string(),
            }),
        }
    }

    async fn release_lost_connection(&mut self) {
        if let Some(connection) = self.connection.take()
            && let Err(e) = connection.close().await
        {
            debug!(worker = self.worker, error = %e, "Releasing lost connection failed");
        }
    }

    /// Closes the connection if one is open. Without an open connection this is a no-op, so a
    /// second call can never report a second close failure.
    pub async fn teardown(&mut self) -> Result<()> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };

        connection.close().await.map_err(|e| {
            warn!(worker = self.worker, error = %e, "Closing store connection failed");
            Error::Connection(format!("worker={} closing connection: {e}", self.worker))
        })?;

        debug!(worker = self.worker, "Closed store connection");
        Ok(())
    }
}
