//! In-process execution engine.
//!
//! [LocalRunner] spreads the source records over a fixed number of workers. Every worker is a
//! tokio task that owns one [Stage] instance and processes its bundles one after another:
//!
//! ```text
//!   records ─► bundles ─► worker 0: setup ─► process* ─► teardown ─► next bundle ...
//!                      └► worker 1: setup ─► process* ─► teardown ─► next bundle ...
//! ```
//!
//! Retries belong to the runner, never to the stage. A [`Error::Write`] re-invokes `process` for
//! the same record. A [`Error::Connection`] discards the stage, creates a fresh one and replays
//! the whole bundle. Anything else fails the run. Teardown runs on every exit path of a bundle,
//! including cancellation.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::RetryConfig;
use crate::message::Record;
use crate::sinker::stage::Stage;
use crate::{Error, Result};

pub mod handle;
pub mod retry;

use handle::{PipelineRunHandle, RunReport, RunState, TerminalState, WorkerReport};

const DEFAULT_BUNDLE_SIZE: usize = 100;

pub struct LocalRunner {
    parallelism: usize,
    bundle_size: usize,
    retry: RetryConfig,
    shutdown: CancellationToken,
}

impl LocalRunner {
    pub fn new(parallelism: usize, retry: RetryConfig) -> Self {
        Self {
            parallelism: parallelism.max(1),
            bundle_size: DEFAULT_BUNDLE_SIZE,
            retry,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn bundle_size(mut self, bundle_size: usize) -> Self {
        self.bundle_size = bundle_size.max(1);
        self
    }

    /// Runs started by this runner are also cancelled when `shutdown` is.
    pub fn shutdown_token(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Starts executing and returns immediately. `new_stage` is called with the worker index
    /// whenever a worker needs a fresh stage instance. Must be called within a tokio runtime.
    pub fn start<S, F>(&self, job_name: &str, records: Vec<Record>, new_stage: F) -> PipelineRunHandle
    where
        S: Stage + 'static,
        F: Fn(usize) -> S + Send + Sync + 'static,
    {
        let cancel = self.shutdown.child_token();
        let (state_tx, state_rx) = watch::channel(RunState::Running);
        let report = Arc::new(Mutex::new(RunReport::default()));
        let new_stage = Arc::new(new_stage);

        info!(
            job = job_name,
            records = records.len(),
            workers = self.parallelism,
            "Starting pipeline"
        );

        let mut workers = JoinSet::new();
        for (worker, bundles) in assign_bundles(records, self.parallelism, self.bundle_size)
            .into_iter()
            .enumerate()
        {
            let worker = Worker {
                id: worker,
                new_stage: Arc::clone(&new_stage),
                retry: self.retry.clone(),
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run(bundles));
        }

        let supervisor_report = Arc::clone(&report);
        let supervisor_cancel = cancel.clone();
        let job = job_name.to_string();
        tokio::spawn(async move {
            let terminal = supervise(workers, &supervisor_report, &supervisor_cancel).await;
            info!(
                job,
                state = %terminal,
                records_written = supervisor_report.lock().records_written(),
                "Pipeline finished"
            );
            let _ = state_tx.send(terminal.into());
        });

        PipelineRunHandle::new(job_name.to_string(), state_rx, report, cancel)
    }
}

/// Waits for every worker and folds their outcomes into one terminal state. The first failure
/// cancels the remaining workers; a failure wins over a cancellation.
async fn supervise(
    mut workers: JoinSet<WorkerExit>,
    report: &Mutex<RunReport>,
    cancel: &CancellationToken,
) -> TerminalState {
    let mut failure: Option<String> = None;
    let mut cancelled = false;
    let mut reports = Vec::new();

    while let Some(joined) = workers.join_next().await {
        let result = match joined {
            Ok(exit) => {
                reports.push(exit.report);
                exit.result
            }
            Err(e) => Err(Error::Engine(format!("worker task did not complete: {e}"))),
        };
        match result {
            Ok(WorkerEnd::Completed) => {}
            Ok(WorkerEnd::Cancelled) => cancelled = true,
            Err(e) => {
                error!(error = %e, "Worker failed");
                if failure.is_none() {
                    failure = Some(e.to_string());
                    cancel.cancel();
                }
            }
        }
    }

    reports.sort_by_key(|r| r.worker);
    report.lock().workers = reports;

    match failure {
        Some(reason) => TerminalState::Failed { reason },
        None if cancelled => TerminalState::Cancelled,
        None => TerminalState::Succeeded,
    }
}

/// Splits records into bundles of at most `bundle_size` and deals them round-robin to
/// `workers` workers. Bundle order per worker follows record order.
fn assign_bundles(records: Vec<Record>, workers: usize, bundle_size: usize) -> Vec<Vec<Vec<Record>>> {
    let mut assigned: Vec<Vec<Vec<Record>>> = vec![Vec::new(); workers];
    let mut bundle = Vec::with_capacity(bundle_size);
    let mut next = 0;

    for record in records {
        bundle.push(record);
        if bundle.len() == bundle_size {
            if let Some(slot) = assigned.get_mut(next % workers) {
                slot.push(std::mem::take(&mut bundle));
            }
            next += 1;
        }
    }
    if !bundle.is_empty()
        && let Some(slot) = assigned.get_mut(next % workers)
    {
        slot.push(bundle);
    }
    assigned
}

/// A worker's counts travel with its result, so a failed worker still reports what it wrote.
struct WorkerExit {
    report: WorkerReport,
    result: Result<WorkerEnd>,
}

enum WorkerEnd {
    Completed,
    Cancelled,
}

enum BundleOutcome {
    Completed,
    Cancelled,
}

struct Worker<F> {
    id: usize,
    new_stage: Arc<F>,
    retry: RetryConfig,
    cancel: CancellationToken,
}

impl<S, F> Worker<F>
where
    S: Stage,
    F: Fn(usize) -> S,
{
    async fn run(self, bundles: Vec<Vec<Record>>) -> WorkerExit {
        let mut report = WorkerReport {
            worker: self.id,
            ..Default::default()
        };
        let result = self.run_bundles(&bundles, &mut report).await;
        WorkerExit { report, result }
    }

    async fn run_bundles(
        &self,
        bundles: &[Vec<Record>],
        report: &mut WorkerReport,
    ) -> Result<WorkerEnd> {
        let mut stage = (self.new_stage)(self.id);

        for bundle in bundles {
            let mut backoff = self.retry.backoff();
            loop {
                // writes of an attempt only count once that attempt is not going to be replayed
                let mut written = 0;
                let result = self
                    .run_bundle(&mut stage, bundle, &mut written, report)
                    .await;
                match result {
                    Ok(BundleOutcome::Completed) => {
                        report.records_written += written;
                        report.bundles += 1;
                        break;
                    }
                    Ok(BundleOutcome::Cancelled) => {
                        report.records_written += written;
                        return Ok(WorkerEnd::Cancelled);
                    }
                    Err(e @ Error::Connection(_)) => {
                        let Some(delay) = backoff.next() else {
                            report.records_written += written;
                            return Err(e);
                        };
                        warn!(
                            worker = self.id,
                            attempt = backoff.attempts(),
                            error = %e,
                            "Retrying bundle on a fresh stage"
                        );
                        if !self.pause(delay).await {
                            report.records_written += written;
                            return Ok(WorkerEnd::Cancelled);
                        }
                        stage = (self.new_stage)(self.id);
                        report.bundle_retries += 1;
                    }
                    Err(e) => {
                        report.records_written += written;
                        return Err(e);
                    }
                }
            }
        }
        Ok(WorkerEnd::Completed)
    }

    /// Scoped acquisition for one bundle: teardown runs whether the bundle completes, fails or
    /// gets cancelled.
    async fn run_bundle(
        &self,
        stage: &mut S,
        bundle: &[Record],
        written: &mut usize,
        report: &mut WorkerReport,
    ) -> Result<BundleOutcome> {
        let result = match stage.setup().await {
            Ok(()) => self.process_bundle(stage, bundle, written, report).await,
            Err(e) => Err(e),
        };

        match (result, stage.teardown().await) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                warn!(worker = self.id, error = %teardown_err, "Teardown failed after bundle error");
                Err(e)
            }
        }
    }

    async fn process_bundle(
        &self,
        stage: &mut S,
        bundle: &[Record],
        written: &mut usize,
        report: &mut WorkerReport,
    ) -> Result<BundleOutcome> {
        for record in bundle {
            let mut backoff = self.retry.backoff();
            loop {
                // dropping an in-flight write on cancel leaves it unknown whether it landed
                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(BundleOutcome::Cancelled),
                    result = stage.process(record) => result,
                };

                match result {
                    Ok(()) => {
                        *written += 1;
                        break;
                    }
                    Err(e @ Error::Write { .. }) => {
                        let Some(delay) = backoff.next() else {
                            return Err(e);
                        };
                        warn!(
                            worker = self.id,
                            key = %record.key,
                            attempt = backoff.attempts(),
                            error = %e,
                            "Retrying write"
                        );
                        report.write_retries += 1;
                        if !self.pause(delay).await {
                            return Ok(BundleOutcome::Cancelled);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(BundleOutcome::Completed)
    }

    /// Sleeps for `delay`; returns false when cancelled first.
    async fn pause(&self, delay: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::deferred::{Deferred, RuntimeParams};
    use crate::kvstore::memory::InMemoryStore;
    use crate::pipeline::SinkSpec;
    use crate::sinker::manager::SinkResourceManager;
    use crate::sinker::stage::WriteStage;

    fn fast_retry(max_retry_attempts: u16) -> RetryConfig {
        RetryConfig {
            max_retry_attempts,
            initial_retry_interval_in_ms: 1,
            max_retry_interval_in_ms: 5,
            retry_jitter: 0.0,
            ..Default::default()
        }
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n).map(|i| Record::new(format!("k{i}"), format!("v{i}"))).collect()
    }

    fn start(runner: &LocalRunner, store: &InMemoryStore, records: Vec<Record>) -> PipelineRunHandle {
        let sink = SinkSpec {
            host: Deferred::resolved("localhost".to_string()),
            port: Deferred::resolved(6379),
        };
        let params = Arc::new(RuntimeParams::new());
        let store = store.clone();
        runner.start("test-job", records, move |worker| {
            WriteStage::new(SinkResourceManager::new(
                worker,
                &sink,
                Arc::clone(&params),
                store.clone(),
            ))
        })
    }

    #[test]
    fn test_assign_bundles() {
        let assigned = assign_bundles(records(5), 2, 2);
        assert_eq!(assigned.len(), 2);
        assert_eq!(assigned[0], vec![records(2), vec![Record::new("k4", "v4")]]);
        assert_eq!(assigned[1], vec![vec![Record::new("k2", "v2"), Record::new("k3", "v3")]]);

        let assigned = assign_bundles(records(1), 3, 100);
        assert_eq!(assigned[0].len(), 1);
        assert!(assigned[1].is_empty());
        assert!(assigned[2].is_empty());
    }

    #[tokio::test]
    async fn test_run_succeeds() {
        let store = InMemoryStore::new();
        let runner = LocalRunner::new(3, fast_retry(3)).bundle_size(4);
        let handle = start(&runner, &store, records(25));

        assert_eq!(handle.await_terminal().await, TerminalState::Succeeded);
        assert_eq!(handle.state(), RunState::Succeeded);
        assert_eq!(store.snapshot().len(), 25);
        assert_eq!(store.value("k24"), Some("v24".to_string()));

        // one connection per bundle, every one of them released
        assert_eq!(store.connects(), 7);
        assert_eq!(store.open_connections(), 0);

        let report = handle.report();
        assert_eq!(report.records_written(), 25);
        assert_eq!(report.workers.len(), 3);
        assert_eq!(report.workers.iter().map(|w| w.bundles).sum::<usize>(), 7);
    }

    #[tokio::test]
    async fn test_write_retried_by_runner() {
        let store = InMemoryStore::new();
        store.faults().fail_sets(2);
        let runner = LocalRunner::new(1, fast_retry(3));
        let handle = start(&runner, &store, records(3));

        assert_eq!(handle.await_terminal().await, TerminalState::Succeeded);
        assert_eq!(store.writes(), 3);
        assert_eq!(store.connects(), 1);
        assert_eq!(handle.report().workers[0].write_retries, 2);
    }

    #[tokio::test]
    async fn test_write_retries_exhausted_fails_run() {
        let store = InMemoryStore::new();
        store.faults().fail_sets(10);
        let runner = LocalRunner::new(1, fast_retry(2));
        let handle = start(&runner, &store, records(1));

        match handle.await_terminal().await {
            TerminalState::Failed { reason } => assert!(reason.contains("key=k0")),
            other => panic!("unexpected terminal state {other:?}"),
        }
        assert_eq!(store.writes(), 0);
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_connection_failure_retries_bundle_on_fresh_stage() {
        let store = InMemoryStore::new();
        store.faults().fail_connects(2);
        let runner = LocalRunner::new(1, fast_retry(3));
        let handle = start(&runner, &store, records(2));

        assert_eq!(handle.await_terminal().await, TerminalState::Succeeded);
        assert_eq!(store.connects(), 1);
        assert_eq!(store.closes(), 1);
        assert_eq!(handle.report().workers[0].bundle_retries, 2);
    }

    #[tokio::test]
    async fn test_connection_failure_exhausted_fails_run() {
        let store = InMemoryStore::new();
        store.faults().fail_connects(10);
        let runner = LocalRunner::new(2, fast_retry(1));
        let handle = start(&runner, &store, records(2));

        assert!(matches!(
            handle.await_terminal().await,
            TerminalState::Failed { .. }
        ));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_cancel_releases_connections() {
        let store = InMemoryStore::new();
        store.faults().set_write_latency(Duration::from_millis(20));
        let runner = LocalRunner::new(2, fast_retry(0));
        let handle = start(&runner, &store, records(200));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();

        assert_eq!(handle.await_terminal().await, TerminalState::Cancelled);
        assert!(store.writes() < 200);
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_parameter_fails_run_without_connecting() {
        let store = InMemoryStore::new();
        let sink = SinkSpec {
            host: Deferred::unresolved("redisHost"),
            port: Deferred::resolved(6379),
        };
        let params = Arc::new(RuntimeParams::new());
        let connector = store.clone();
        let handle = LocalRunner::new(1, fast_retry(3)).start("job", records(1), move |worker| {
            WriteStage::new(SinkResourceManager::new(
                worker,
                &sink,
                Arc::clone(&params),
                connector.clone(),
            ))
        });

        match handle.await_terminal().await {
            TerminalState::Failed { reason } => assert!(reason.contains("redisHost")),
            other => panic!("unexpected terminal state {other:?}"),
        }
        assert_eq!(store.connects(), 0);
    }

    #[tokio::test]
    async fn test_replayed_bundle_is_counted_once() {
        let store = InMemoryStore::new();
        store.faults().fail_closes(1);
        let runner = LocalRunner::new(1, fast_retry(3));
        let handle = start(&runner, &store, records(3));

        assert_eq!(handle.await_terminal().await, TerminalState::Succeeded);
        // the close failure replays the whole bundle
        assert_eq!(store.writes(), 6);
        assert_eq!(store.snapshot().len(), 3);

        let report = handle.report();
        assert_eq!(report.records_written(), 3);
        assert_eq!(report.workers[0].bundles, 1);
        assert_eq!(report.workers[0].bundle_retries, 1);
    }

    #[tokio::test]
    async fn test_lost_connection_replays_bundle_on_fresh_connection() {
        let store = InMemoryStore::new();
        store.faults().set_write_latency(Duration::from_millis(20));
        let runner = LocalRunner::new(1, fast_retry(3));
        let handle = start(&runner, &store, records(5));

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.faults().drop_connections();

        assert_eq!(handle.await_terminal().await, TerminalState::Succeeded);
        assert_eq!(store.snapshot().len(), 5);
        assert!(store.connects() >= 2);
        assert_eq!(store.open_connections(), 0);

        let report = handle.report();
        assert!(report.workers[0].bundle_retries >= 1);
        assert_eq!(report.records_written(), 5);
    }

    /// Fails with a non-retryable error on one key.
    struct FailingStage {
        fail_key: &'static str,
    }

    impl Stage for FailingStage {
        async fn setup(&mut self) -> Result<()> {
            Ok(())
        }

        async fn process(&mut self, record: &Record) -> Result<()> {
            if record.key == self.fail_key {
                return Err(Error::Engine(format!("cannot write {}", record.key)));
            }
            Ok(())
        }

        async fn teardown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_replayed_and_keeps_report() {
        let stages = Arc::new(AtomicUsize::new(0));
        let created = Arc::clone(&stages);
        let handle = LocalRunner::new(1, fast_retry(3))
            .bundle_size(2)
            .start("job", records(4), move |_| {
                created.fetch_add(1, Ordering::SeqCst);
                FailingStage { fail_key: "k2" }
            });

        match handle.await_terminal().await {
            TerminalState::Failed { reason } => assert!(reason.contains("k2")),
            other => panic!("unexpected terminal state {other:?}"),
        }
        assert_eq!(stages.load(Ordering::SeqCst), 1);

        let report = handle.report();
        assert_eq!(report.workers.len(), 1);
        assert_eq!(report.workers[0].records_written, 2);
        assert_eq!(report.workers[0].bundles, 1);
        assert_eq!(report.workers[0].bundle_retries, 0);
    }

    #[tokio::test]
    async fn test_shutdown_token_cancels_run() {
        let store = InMemoryStore::new();
        store.faults().set_write_latency(Duration::from_millis(20));
        let shutdown = CancellationToken::new();
        let runner = LocalRunner::new(1, fast_retry(0)).shutdown_token(shutdown.clone());
        let handle = start(&runner, &store, records(100));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();

        assert_eq!(handle.await_terminal().await, TerminalState::Cancelled);
        assert_eq!(store.open_connections(), 0);
    }
}
