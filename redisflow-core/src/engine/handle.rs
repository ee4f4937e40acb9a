use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a run as seen through its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl RunState {
    pub fn terminal(&self) -> Option<TerminalState> {
        match self {
            RunState::Running => None,
            RunState::Succeeded => Some(TerminalState::Succeeded),
            RunState::Failed(reason) => Some(TerminalState::Failed {
                reason: reason.clone(),
            }),
            RunState::Cancelled => Some(TerminalState::Cancelled),
        }
    }
}

impl From<TerminalState> for RunState {
    fn from(state: TerminalState) -> Self {
        match state {
            TerminalState::Succeeded => RunState::Succeeded,
            TerminalState::Failed { reason } => RunState::Failed(reason),
            TerminalState::Cancelled => RunState::Cancelled,
        }
    }
}

/// The closed set of states a run can end in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    Succeeded,
    Failed { reason: String },
    Cancelled,
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalState::Succeeded => write!(f, "Succeeded"),
            TerminalState::Failed { reason } => write!(f, "Failed: {reason}"),
            TerminalState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// What one worker got done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub bundles: usize,
    /// Writes from bundle attempts that were not replayed afterwards.
    pub records_written: usize,
    pub write_retries: usize,
    pub bundle_retries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub workers: Vec<WorkerReport>,
}

impl RunReport {
    pub fn records_written(&self) -> usize {
        self.workers.iter().map(|w| w.records_written).sum()
    }
}

/// PipelineRunHandle is returned once a graph starts executing. It can be polled, awaited, or
/// used to cancel the run. Awaiting suspends only the caller, never a worker.
#[derive(Debug, Clone)]
pub struct PipelineRunHandle {
    job_name: String,
    state: watch::Receiver<RunState>,
    report: Arc<Mutex<RunReport>>,
    cancel: CancellationToken,
}

impl PipelineRunHandle {
    pub(crate) fn new(
        job_name: String,
        state: watch::Receiver<RunState>,
        report: Arc<Mutex<RunReport>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_name,
            state,
            report,
            cancel,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    /// Blocks the caller until the run is Succeeded, Failed or Cancelled.
    pub async fn await_terminal(&self) -> TerminalState {
        let mut state = self.state.clone();
        match state.wait_for(|s| s.terminal().is_some()).await {
            Ok(s) => s.terminal().unwrap_or(TerminalState::Failed {
                reason: "run reported a non-terminal state".to_string(),
            }),
            Err(_) => TerminalState::Failed {
                reason: "run supervisor exited without reporting a terminal state".to_string(),
            },
        }
    }

    /// Asks every worker to stop. In-flight writes may or may not land; connections are still
    /// released.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Per-worker counts. Complete once the run is terminal.
    pub fn report(&self) -> RunReport {
        self.report.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_await_terminal() {
        let (tx, rx) = watch::channel(RunState::Running);
        let handle = PipelineRunHandle::new(
            "job".to_string(),
            rx,
            Arc::default(),
            CancellationToken::new(),
        );
        assert_eq!(handle.state(), RunState::Running);

        tokio::spawn(async move {
            tx.send(RunState::Failed("boom".to_string())).unwrap();
        });

        assert_eq!(
            handle.await_terminal().await,
            TerminalState::Failed {
                reason: "boom".to_string()
            }
        );
        assert_eq!(handle.state(), RunState::Failed("boom".to_string()));
    }

    #[tokio::test]
    async fn test_await_terminal_when_supervisor_is_gone() {
        let (tx, rx) = watch::channel(RunState::Running);
        let handle = PipelineRunHandle::new(
            "job".to_string(),
            rx,
            Arc::default(),
            CancellationToken::new(),
        );
        drop(tx);
        assert!(matches!(
            handle.await_terminal().await,
            TerminalState::Failed { .. }
        ));
    }

    #[test]
    fn test_state_conversions() {
        assert_eq!(RunState::Running.terminal(), None);
        for state in [
            TerminalState::Succeeded,
            TerminalState::Cancelled,
            TerminalState::Failed {
                reason: "x".to_string(),
            },
        ] {
            assert_eq!(RunState::from(state.clone()).terminal(), Some(state));
        }
    }
}
