//! The execution graph: a source of records feeding the terminal write stage.
//!
//! The graph is plain data so it can be serialized into a template as is. Host and port of the
//! sink travel as [`Deferred`] values and are only resolved once a worker sets the stage up.

use serde::{Deserialize, Serialize};

use crate::config::{MAX_PARALLELISM, RetryConfig, SinkConfiguration};
use crate::deferred::Deferred;
use crate::message::Record;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineGraph {
    pub job_name: String,
    pub source: SourceSpec,
    pub sink: SinkSpec,
    pub parallelism: usize,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceSpec {
    /// A fixed, in-graph collection of records.
    Create { records: Vec<Record> },
}

/// Where the terminal stage writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkSpec {
    pub host: Deferred<String>,
    pub port: Deferred<u16>,
}

impl SinkSpec {
    /// Names of the parameters still waiting for a launch-time value.
    pub fn unresolved_params(&self) -> Vec<&str> {
        [self.host.pending_name(), self.port.pending_name()]
            .into_iter()
            .flatten()
            .collect()
    }
}

impl PipelineGraph {
    /// Builds the graph `Create(records) -> Write(host, port)` from a resolved configuration.
    pub fn build(config: &SinkConfiguration) -> Result<Self> {
        let graph = Self {
            job_name: config.job_name.clone(),
            source: SourceSpec::Create {
                records: config.records.clone(),
            },
            sink: SinkSpec {
                host: config.host.clone(),
                port: config.port.clone(),
            },
            parallelism: config.parallelism,
            retry: config.retry.clone(),
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Structural checks, run on build and again on graphs loaded from a template.
    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() {
            return Err(Error::Config("graph has an empty job name".to_string()));
        }
        if !(1..=MAX_PARALLELISM).contains(&self.parallelism) {
            return Err(Error::Config(format!(
                "job {} has parallelism {}, expected 1 to {MAX_PARALLELISM} workers",
                self.job_name, self.parallelism
            )));
        }
        match &self.source {
            SourceSpec::Create { records } if records.is_empty() => Err(Error::Config(format!(
                "job {} has a source without records",
                self.job_name
            ))),
            SourceSpec::Create { .. } => Ok(()),
        }
    }

    pub fn records(&self) -> &[Record] {
        match &self.source {
            SourceSpec::Create { records } => records,
        }
    }
}
