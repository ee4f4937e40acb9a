use tracing::{info, warn};

use crate::kvstore::{Connection, Connector, Endpoint};
use crate::{Error, Result};

pub const DIAGNOSTIC_KEY: &str = "message";
pub const DIAGNOSTIC_VALUE: &str = "Hello from redisflow!";

/// Result of a single SET followed by a GET of the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub endpoint: Endpoint,
    pub key: String,
    pub written: String,
    pub read_back: Option<String>,
}

impl DiagnosticReport {
    /// True when the value read back is the one written.
    pub fn round_trip_ok(&self) -> bool {
        self.read_back.as_deref() == Some(self.written.as_str())
    }
}

/// Connects to `endpoint`, writes [`DIAGNOSTIC_KEY`], reads it back and closes the connection.
/// The connection is closed even when the write or the read fails.
pub async fn diagnose<C: Connector>(connector: &C, endpoint: &Endpoint) -> Result<DiagnosticReport> {
    let mut conn = connector
        .connect(endpoint)
        .await
        .map_err(|e| Error::Connection(format!("connecting to {endpoint}: {e}")))?;

    let result = exchange(&mut conn).await;

    if let Err(e) = conn.close().await {
        warn!(%endpoint, error = %e, "Failed to close diagnostic connection");
        if result.is_ok() {
            return Err(Error::Connection(format!("closing {endpoint}: {e}")));
        }
    }

    let read_back = result?;
    info!(%endpoint, key = DIAGNOSTIC_KEY, ?read_back, "Diagnostic completed");
    Ok(DiagnosticReport {
        endpoint: endpoint.clone(),
        key: DIAGNOSTIC_KEY.to_string(),
        written: DIAGNOSTIC_VALUE.to_string(),
        read_back,
    })
}

async fn exchange<T: Connection>(conn: &mut T) -> Result<Option<String>> {
    conn.set(DIAGNOSTIC_KEY, DIAGNOSTIC_VALUE)
        .await
        .map_err(|e| Error::Write {
            worker: 0,
            key: DIAGNOSTIC_KEY.to_string(),
            cause: e.to_string(),
        })?;
    conn.get(DIAGNOSTIC_KEY)
        .await
        .map_err(|e| Error::Connection(format!("reading back {DIAGNOSTIC_KEY}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::memory::InMemoryStore;

    #[tokio::test]
    async fn test_diagnose_round_trip() {
        let store = InMemoryStore::new();
        let report = diagnose(&store, &Endpoint::new("localhost", 6379))
            .await
            .unwrap();

        assert!(report.round_trip_ok());
        assert_eq!(report.read_back.as_deref(), Some("Hello from redisflow!"));
        assert_eq!(store.value("message"), Some(DIAGNOSTIC_VALUE.to_string()));
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_diagnose_connect_failure() {
        let store = InMemoryStore::new();
        store.faults().fail_connects(1);

        let result = diagnose(&store, &Endpoint::new("localhost", 6379)).await;
        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_diagnose_write_failure_still_closes() {
        let store = InMemoryStore::new();
        store.faults().fail_sets(1);

        let result = diagnose(&store, &Endpoint::new("localhost", 6379)).await;
        assert!(matches!(result, Err(Error::Write { ref key, .. }) if key == "message"));
        assert_eq!(store.closes(), 1);
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_diagnose_close_failure() {
        let store = InMemoryStore::new();
        store.faults().fail_closes(1);

        let result = diagnose(&store, &Endpoint::new("localhost", 6379)).await;
        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(store.value("message"), Some(DIAGNOSTIC_VALUE.to_string()));
    }
}
