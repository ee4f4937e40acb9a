//! Values that may only become known when a pipeline is launched.
//!
//! A [`Deferred`] is either bound at graph-construction time or left as a named placeholder that is
//! filled from [`RuntimeParams`] once execution begins. There is no accessor that hands out the
//! inner value without first narrowing to the resolved case.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Deferred<T> {
    /// Known type, unknown value. Only the parameter name travels with the graph.
    Unresolved { name: String },
    Resolved { value: T },
}

impl<T> Deferred<T> {
    pub fn unresolved(name: impl Into<String>) -> Self {
        Deferred::Unresolved { name: name.into() }
    }

    pub fn resolved(value: T) -> Self {
        Deferred::Resolved { value }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Deferred::Resolved { .. })
    }

    pub fn as_resolved(&self) -> Option<&T> {
        match self {
            Deferred::Resolved { value } => Some(value),
            Deferred::Unresolved { .. } => None,
        }
    }

    /// Name of the launch parameter this value is still waiting on.
    pub fn pending_name(&self) -> Option<&str> {
        match self {
            Deferred::Unresolved { name } => Some(name),
            Deferred::Resolved { .. } => None,
        }
    }
}

impl<T> Deferred<T>
where
    T: FromStr + Clone,
    T::Err: Display,
{
    /// Returns the concrete value, reading unresolved parameters from the launch-time bindings.
    pub fn resolve(&self, params: &RuntimeParams) -> Result<T> {
        match self {
            Deferred::Resolved { value } => Ok(value.clone()),
            Deferred::Unresolved { name } => {
                let raw = params.get(name).ok_or_else(|| {
                    Error::Config(format!("deferred parameter {name} was not supplied at launch"))
                })?;
                raw.parse::<T>().map_err(|e| {
                    Error::Config(format!("parsing deferred parameter {name}={raw:?}: {e}"))
                })
            }
        }
    }
}

/// Launch-time bindings for deferred parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeParams {
    bindings: HashMap<String, String>,
}

impl RuntimeParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Parses `name=value` pairs, e.g. the repeated `--param` flag of the launch command.
    pub fn parse_bindings<I, S>(items: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::new();
        for item in items {
            let item = item.as_ref();
            let (name, value) = item.split_once('=').ok_or_else(|| {
                Error::Config(format!("launch parameter {item:?} is not in name=value form"))
            })?;
            if name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "launch parameter {item:?} has an empty name"
                )));
            }
            params = params.with(name.trim(), value);
        }
        Ok(params)
    }
}
