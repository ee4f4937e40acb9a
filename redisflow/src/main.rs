use std::env;
use std::error::Error;
use std::str::FromStr;

use clap::ArgMatches;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use redisflow_core::config::params::lookup;
use redisflow_core::config::{self, StoreKind};
use redisflow_core::deferred::RuntimeParams;
use redisflow_core::diagnostic;
use redisflow_core::engine::handle::TerminalState;
use redisflow_core::kvstore::memory::InMemoryStore;
use redisflow_core::kvstore::redis::RedisConnector;
use redisflow_core::kvstore::{Connector, Endpoint};
use redisflow_core::orchestrator::{Orchestrator, RunOutcome};
use redisflow_core::template::{FsTemplateWriter, Template};

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    if let Err(e) = run().await {
        error!("{e}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = cmdline::root_cli().get_matches();
    match cli.subcommand() {
        Some(("run", args)) => run_pipeline(args).await,
        Some(("launch", args)) => launch_template(args).await,
        Some(("diagnose", args)) => run_diagnostic(args).await,
        Some((other, _)) => Err(format!("unknown subcommand {other}").into()),
        None => Err("no subcommand given".into()),
    }
}

/// What gets handed to the orchestrator.
enum Submission {
    Run(config::SinkConfiguration),
    Launch {
        template: Template,
        params: RuntimeParams,
        wait: bool,
    },
}

async fn run_pipeline(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let input = cmdline::launch_input(args).with_env(env::vars());
    let config = config::resolve(&input)?;
    info!(job = %config.job_name, mode = ?config.mode, store = ?config.store, "Starting with configuration");

    let store = config.store;
    submit(store, Submission::Run(config)).await
}

async fn launch_template(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let location = args
        .get_one::<String>("template")
        .ok_or("missing --template")?;
    let template = Template::load(location).await?;

    let mut params =
        RuntimeParams::parse_bindings(args.get_many::<String>("param").into_iter().flatten())?;
    for parameter in &template.parameters {
        if params.contains(&parameter.name) {
            continue;
        }
        if let Some(spec) = lookup(&parameter.name)
            && let Ok(value) = env::var(spec.env_var())
        {
            params = params.with(parameter.name.clone(), value);
        }
    }

    let store = match args.get_one::<String>("store") {
        Some(store) => StoreKind::from_str(store)?,
        None => StoreKind::default(),
    };
    let wait = args.get_flag("wait-until-finish");
    info!(location, job = %template.graph.job_name, ?store, "Launching template");

    submit(store, Submission::Launch { template, params, wait }).await
}

async fn submit(store: StoreKind, submission: Submission) -> Result<(), Box<dyn Error>> {
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    match store {
        StoreKind::Redis => execute(RedisConnector::new(), submission, shutdown).await,
        StoreKind::Memory => {
            let memory = InMemoryStore::new();
            let result = execute(memory.clone(), submission, shutdown).await;
            info!(contents = ?memory.snapshot(), "In-memory store after run");
            result
        }
    }
}

async fn execute<C>(
    connector: C,
    submission: Submission,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn Error>>
where
    C: Connector + Clone + Sync + 'static,
{
    let orchestrator = Orchestrator::new(connector, FsTemplateWriter).with_shutdown(shutdown);
    let outcome = match submission {
        Submission::Run(config) => orchestrator.run(&config).await?,
        Submission::Launch {
            template,
            params,
            wait,
        } => orchestrator.launch(template, params, wait).await?,
    };

    match outcome {
        RunOutcome::TemplateWritten { location } => {
            println!("Template written to {location}");
            Ok(())
        }
        RunOutcome::Finished(state) => {
            println!("Job finished: {state}");
            exit_status(state)
        }
        RunOutcome::Submitted(handle) => {
            // the runner lives in this process, so it has to outlive the run even when the
            // caller did not ask to wait for it
            let state = handle.await_terminal().await;
            info!(
                job = handle.job_name(),
                %state,
                records_written = handle.report().records_written(),
                "Run finished"
            );
            Ok(())
        }
    }
}

fn exit_status(state: TerminalState) -> Result<(), Box<dyn Error>> {
    match state {
        TerminalState::Succeeded => Ok(()),
        TerminalState::Failed { reason } => Err(format!("run failed: {reason}").into()),
        TerminalState::Cancelled => Err("run was cancelled".into()),
    }
}

async fn run_diagnostic(args: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let host = args.get_one::<String>("host").ok_or("missing host")?;
    let port = *args.get_one::<u16>("port").ok_or("missing port")?;
    let endpoint = Endpoint::new(host.clone(), port);

    let report = diagnostic::diagnose(&RedisConnector::new(), &endpoint).await?;
    println!("SET {} {:?}", report.key, report.written);
    match &report.read_back {
        Some(value) => println!("GET {} -> {value:?}", report.key),
        None => println!("GET {} -> (nil)", report.key),
    }

    if !report.round_trip_ok() {
        return Err(format!("{endpoint} returned a different value for {}", report.key).into());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C signal");
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal");
            }
            Err(e) => {
                warn!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
