//! A store that lives in process memory.
//!
//! Besides backing `--store memory` dry runs, it keeps count of every connection it hands out and
//! closes, and lets callers inject connect, write and close failures, dropped connections or write
//! latency. Clones share
//! the same data and counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use super::{Connection, Connector, Endpoint, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    closes: AtomicUsize,
    writes: AtomicUsize,
}

/// Fails the next N operations of each kind.
#[derive(Debug, Default)]
pub struct FaultInjector {
    fail_next_connects: AtomicUsize,
    fail_next_sets: AtomicUsize,
    fail_next_closes: AtomicUsize,
    set_latency_ms: AtomicU64,
    /// Connections opened under an older generation are dead.
    generation: AtomicUsize,
}

impl FaultInjector {
    pub fn fail_connects(&self, count: usize) {
        self.fail_next_connects.store(count, Ordering::Relaxed);
    }

    pub fn fail_sets(&self, count: usize) {
        self.fail_next_sets.store(count, Ordering::Relaxed);
    }

    pub fn fail_closes(&self, count: usize) {
        self.fail_next_closes.store(count, Ordering::Relaxed);
    }

    /// Kills every connection open right now. They report [`StoreError::Disconnected`] from then
    /// on; connections opened afterwards work.
    pub fn drop_connections(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_write_latency(&self, latency: Duration) {
        self.set_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Consumes one pending failure, if any.
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn write_latency(&self) -> Option<Duration> {
        match self.set_latency_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<HashMap<String, String>>>,
    endpoints: Arc<RwLock<Vec<Endpoint>>>,
    counters: Arc<Counters>,
    faults: Arc<FaultInjector>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.data.read().get(key).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.data.read().clone()
    }

    /// Successful connects.
    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Successful closes.
    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Connections handed out and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.connects().saturating_sub(self.closes())
    }

    /// Successful writes.
    pub fn writes(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    /// Endpoints of every successful connect, in order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.read().clone()
    }
}

impl Connector for InMemoryStore {
    type Connection = InMemoryConnection;

    async fn connect(&self, endpoint: &Endpoint) -> StoreResult<InMemoryConnection> {
        if FaultInjector::take(&self.faults.fail_next_connects) {
            return Err(StoreError::Connect(format!(
                "injected connect failure for {endpoint}"
            )));
        }
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        self.endpoints.write().push(endpoint.clone());
        Ok(InMemoryConnection {
            store: self.clone(),
            generation: self.faults.generation.load(Ordering::SeqCst),
        })
    }
}

pub struct InMemoryConnection {
    store: InMemoryStore,
    generation: usize,
}

impl InMemoryConnection {
    fn ensure_alive(&self) -> StoreResult<()> {
        if self.store.faults.generation.load(Ordering::SeqCst) != self.generation {
            return Err(StoreError::Disconnected("connection dropped".to_string()));
        }
        Ok(())
    }
}

impl Connection for InMemoryConnection {
    async fn set(&mut self, key: &str, value: &str) -> StoreResult<()> {
        if let Some(latency) = self.store.faults.write_latency() {
            tokio::time::sleep(latency).await;
        }
        self.ensure_alive()?;
        if FaultInjector::take(&self.store.faults.fail_next_sets) {
            return Err(StoreError::Command(format!("injected SET failure for {key}")));
        }
        self.store
            .data
            .write()
            .insert(key.to_string(), value.to_string());
        self.store.counters.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_alive()?;
        Ok(self.store.value(key))
    }

    async fn close(self) -> StoreResult<()> {
        if FaultInjector::take(&self.store.faults.fail_next_closes) {
            return Err(StoreError::Close("injected close failure".to_string()));
        }
        self.store.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
