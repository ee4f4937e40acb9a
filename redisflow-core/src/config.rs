use std::fmt::Display;
use std::str::FromStr;

use tracing::info;

use crate::deferred::Deferred;
use crate::message::Record;
use crate::{Error, Result};

pub mod params;
pub mod retry;

use params::{
    INITIAL_RETRY_INTERVAL_MS, JOB_NAME, LaunchInput, MAX_RETRY_ATTEMPTS, MAX_RETRY_INTERVAL_MS,
    PARALLELISM, RECORDS, REDIS_HOST, REDIS_PORT, STORE, TEMPLATE_LOCATION, WAIT_UNTIL_FINISH,
};
pub use retry::RetryConfig;

pub const DEFAULT_JOB_NAME: &str = "redis-writer-job";
pub const DEFAULT_RECORDS: &str = "hello_key=hello";
const DEFAULT_PARALLELISM: usize = 1;
/// Upper bound on sink workers, each of which holds one store connection.
pub const MAX_PARALLELISM: usize = 256;

/// How the pipeline is handled once built. Decided once, while resolving the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Serialize the graph to `location`; deferred parameters stay unresolved and nothing runs.
    Template { location: String },
    /// Execute now, optionally blocking until the run reaches a terminal state.
    Run { wait_until_finish: bool },
}

/// Store backend the runner connects workers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Redis,
    /// In-process store, for dry runs.
    Memory,
}

impl FromStr for StoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreKind::Redis),
            "memory" => Ok(StoreKind::Memory),
            other => Err(Error::Config(format!(
                "unknown store {other:?}, expected redis or memory"
            ))),
        }
    }
}

/// Immutable configuration of one pipeline, produced by [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfiguration {
    pub job_name: String,
    pub host: Deferred<String>,
    pub port: Deferred<u16>,
    pub mode: ExecutionMode,
    pub store: StoreKind,
    pub parallelism: usize,
    pub records: Vec<Record>,
    pub retry: RetryConfig,
}

/// Turns launch input into a validated [`SinkConfiguration`].
///
/// Construction-time parameters are validated here and fail fast. `redisHost` and `redisPort`
/// may be left out when a template is being built; they then stay [`Deferred::Unresolved`] and
/// are only checked once they are bound at launch.
pub fn resolve(input: &LaunchInput) -> Result<SinkConfiguration> {
    let host: Deferred<String> = deferrable(input, REDIS_HOST)?;
    let port: Deferred<u16> = deferrable(input, REDIS_PORT)?;
    let wait_until_finish = parse_or(input, WAIT_UNTIL_FINISH, false)?;

    let mode = match input.get(TEMPLATE_LOCATION) {
        Some(location) => {
            let location = location.trim();
            if location.is_empty() {
                return Err(Error::Config(format!("{TEMPLATE_LOCATION} must not be empty")));
            }
            if wait_until_finish {
                info!("{WAIT_UNTIL_FINISH} has no effect when building a template");
            }
            ExecutionMode::Template {
                location: location.to_string(),
            }
        }
        None => {
            for (name, bound) in [
                (REDIS_HOST, host.is_resolved()),
                (REDIS_PORT, port.is_resolved()),
            ] {
                if !bound {
                    return Err(Error::Config(format!(
                        "{name} is required when running the pipeline directly"
                    )));
                }
            }
            ExecutionMode::Run { wait_until_finish }
        }
    };

    let job_name = input.get(JOB_NAME).unwrap_or(DEFAULT_JOB_NAME).trim();
    if job_name.is_empty() {
        return Err(Error::Config(format!("{JOB_NAME} must not be empty")));
    }

    let parallelism = parse_or(input, PARALLELISM, DEFAULT_PARALLELISM)?;
    if !(1..=MAX_PARALLELISM).contains(&parallelism) {
        return Err(Error::Config(format!(
            "{PARALLELISM} must be between 1 and {MAX_PARALLELISM}, got {parallelism}"
        )));
    }

    let defaults = RetryConfig::default();
    let retry = RetryConfig {
        max_retry_attempts: parse_or(input, MAX_RETRY_ATTEMPTS, defaults.max_retry_attempts)?,
        initial_retry_interval_in_ms: parse_or(
            input,
            INITIAL_RETRY_INTERVAL_MS,
            defaults.initial_retry_interval_in_ms,
        )?,
        max_retry_interval_in_ms: parse_or(
            input,
            MAX_RETRY_INTERVAL_MS,
            defaults.max_retry_interval_in_ms,
        )?,
        ..defaults
    };

    Ok(SinkConfiguration {
        job_name: job_name.to_string(),
        host,
        port,
        mode,
        store: parse_or(input, STORE, StoreKind::default())?,
        parallelism,
        records: parse_records(input.get(RECORDS).unwrap_or(DEFAULT_RECORDS))?,
        retry,
    })
}

fn deferrable<T>(input: &LaunchInput, name: &str) -> Result<Deferred<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match input.get(name) {
        None => Ok(Deferred::unresolved(name)),
        Some(raw) if raw.trim().is_empty() => {
            Err(Error::Config(format!("{name} must not be empty")))
        }
        Some(raw) => raw
            .trim()
            .parse()
            .map(Deferred::resolved)
            .map_err(|e| Error::Config(format!("parsing {name}={raw:?}: {e}"))),
    }
}

fn parse_or<T>(input: &LaunchInput, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match input.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("parsing {name}={raw:?}: {e}"))),
    }
}

fn parse_records(raw: &str) -> Result<Vec<Record>> {
    let records = raw
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::parse)
        .collect::<Result<Vec<Record>>>()?;

    if records.is_empty() {
        return Err(Error::Config(format!("{RECORDS} must name at least one record")));
    }
    Ok(records)
}
