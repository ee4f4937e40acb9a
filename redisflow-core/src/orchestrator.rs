use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ExecutionMode, SinkConfiguration};
use crate::deferred::RuntimeParams;
use crate::engine::LocalRunner;
use crate::engine::handle::{PipelineRunHandle, TerminalState};
use crate::kvstore::Connector;
use crate::pipeline::PipelineGraph;
use crate::sinker::manager::SinkResourceManager;
use crate::sinker::stage::WriteStage;
use crate::template::{Template, TemplateWriter};
use crate::{Error, Result};

/// What [`Orchestrator::run`] ended with.
#[derive(Debug)]
pub enum RunOutcome {
    /// A template was written; nothing was executed.
    TemplateWritten { location: String },
    /// Execution started and the caller did not ask to wait.
    Submitted(PipelineRunHandle),
    /// Execution finished in the given state.
    Finished(TerminalState),
}

/// Orchestrator builds the `source -> write` graph and either persists it as a template or
/// executes it on the local runner.
pub struct Orchestrator<C, W> {
    connector: C,
    template_writer: W,
    shutdown: CancellationToken,
}

impl<C, W> Orchestrator<C, W>
where
    C: Connector + Clone + Sync + 'static,
    W: TemplateWriter + Sync,
{
    pub fn new(connector: C, template_writer: W) -> Self {
        Self {
            connector,
            template_writer,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling `shutdown` cancels every run this orchestrator starts, including one it is
    /// waiting on.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Runs the pipeline described by `config`.
    ///
    /// Graph construction errors are returned before anything executes. Failures during
    /// execution are only reported through the terminal state of the run.
    pub async fn run(&self, config: &SinkConfiguration) -> Result<RunOutcome> {
        let graph = PipelineGraph::build(config)?;

        match &config.mode {
            ExecutionMode::Template { location } => {
                let template = Template::new(graph);
                self.template_writer
                    .write(location, &template.to_json()?)
                    .await?;
                let deferred: Vec<&str> =
                    template.parameters.iter().map(|p| p.name.as_str()).collect();
                info!(location, ?deferred, "Template created");
                Ok(RunOutcome::TemplateWritten {
                    location: location.clone(),
                })
            }
            ExecutionMode::Run { wait_until_finish } => {
                let handle = self.execute(graph, RuntimeParams::new())?;
                Ok(Self::finish(handle, *wait_until_finish).await)
            }
        }
    }

    /// Executes a previously built template, binding its deferred parameters from `params`.
    pub async fn launch(
        &self,
        template: Template,
        params: RuntimeParams,
        wait_until_finish: bool,
    ) -> Result<RunOutcome> {
        let handle = self.execute(template.graph, params)?;
        Ok(Self::finish(handle, wait_until_finish).await)
    }

    fn execute(&self, graph: PipelineGraph, params: RuntimeParams) -> Result<PipelineRunHandle> {
        let missing: Vec<&str> = graph
            .sink
            .unresolved_params()
            .into_iter()
            .filter(|name| !params.contains(name))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "launch is missing deferred parameters: {}",
                missing.join(", ")
            )));
        }
        // bound values must also parse, before any worker starts
        graph.sink.host.resolve(&params)?;
        graph.sink.port.resolve(&params)?;

        let params = Arc::new(params);
        let sink = graph.sink.clone();
        let connector = self.connector.clone();
        let runner = LocalRunner::new(graph.parallelism, graph.retry.clone())
            .shutdown_token(self.shutdown.clone());

        Ok(runner.start(
            &graph.job_name,
            graph.records().to_vec(),
            move |worker| {
                WriteStage::new(SinkResourceManager::new(
                    worker,
                    &sink,
                    Arc::clone(&params),
                    connector.clone(),
                ))
            },
        ))
    }

    async fn finish(handle: PipelineRunHandle, wait_until_finish: bool) -> RunOutcome {
        if !wait_until_finish {
            info!(job = handle.job_name(), "Pipeline submitted");
            return RunOutcome::Submitted(handle);
        }
        RunOutcome::Finished(handle.await_terminal().await)
    }
}
