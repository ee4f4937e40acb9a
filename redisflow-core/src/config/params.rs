//! Declared launch parameters and the flat launch input they are read from.

use std::collections::HashMap;

pub const REDIS_HOST: &str = "redisHost";
pub const REDIS_PORT: &str = "redisPort";
pub const TEMPLATE_LOCATION: &str = "templateLocation";
pub const WAIT_UNTIL_FINISH: &str = "waitUntilFinish";
pub const JOB_NAME: &str = "jobName";
pub const PARALLELISM: &str = "parallelism";
pub const RECORDS: &str = "records";
pub const STORE: &str = "store";
pub const MAX_RETRY_ATTEMPTS: &str = "maxRetryAttempts";
pub const INITIAL_RETRY_INTERVAL_MS: &str = "initialRetryIntervalMs";
pub const MAX_RETRY_INTERVAL_MS: &str = "maxRetryIntervalMs";

const ENV_PREFIX: &str = "REDISFLOW_";

/// When a parameter's value must be known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Validated while the configuration is resolved.
    Construction,
    /// May stay unbound until the pipeline is launched.
    Deferrable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub resolution: Resolution,
    /// Boolean switch; given without a value it means `true`.
    pub flag: bool,
}

impl ParamSpec {
    const fn new(name: &'static str, description: &'static str, resolution: Resolution) -> Self {
        Self {
            name,
            description,
            resolution,
            flag: false,
        }
    }

    const fn flag(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            resolution: Resolution::Construction,
            flag: true,
        }
    }

    /// Environment variable consulted when the parameter is not passed on the command line,
    /// e.g. `redisHost` -> `REDISFLOW_REDIS_HOST`.
    pub fn env_var(&self) -> String {
        let mut var = String::from(ENV_PREFIX);
        for c in self.name.chars() {
            if c.is_ascii_uppercase() {
                var.push('_');
            }
            var.push(c.to_ascii_uppercase());
        }
        var
    }
}

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::new(REDIS_HOST, "Redis host", Resolution::Deferrable),
    ParamSpec::new(REDIS_PORT, "Redis port", Resolution::Deferrable),
    ParamSpec::new(
        TEMPLATE_LOCATION,
        "Template location; when set, a template is written instead of running the pipeline",
        Resolution::Construction,
    ),
    ParamSpec::flag(
        WAIT_UNTIL_FINISH,
        "Wait until the pipeline reaches a terminal state",
    ),
    ParamSpec::new(JOB_NAME, "Job name", Resolution::Construction),
    ParamSpec::new(
        PARALLELISM,
        "Number of parallel sink workers",
        Resolution::Construction,
    ),
    ParamSpec::new(
        RECORDS,
        "Comma separated key=value records produced by the source",
        Resolution::Construction,
    ),
    ParamSpec::new(
        STORE,
        "Store backend used when running: redis or memory",
        Resolution::Construction,
    ),
    ParamSpec::new(
        MAX_RETRY_ATTEMPTS,
        "Retries per failed write or bundle before the run fails",
        Resolution::Construction,
    ),
    ParamSpec::new(
        INITIAL_RETRY_INTERVAL_MS,
        "First retry delay in milliseconds",
        Resolution::Construction,
    ),
    ParamSpec::new(
        MAX_RETRY_INTERVAL_MS,
        "Upper bound of the retry delay in milliseconds",
        Resolution::Construction,
    ),
];

pub fn lookup(name: &str) -> Option<&'static ParamSpec> {
    PARAMS.iter().find(|p| p.name == name)
}

/// LaunchInput is the flat set of named parameters a pipeline is started with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchInput {
    values: HashMap<String, String>,
}

impl LaunchInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills parameters that were not given explicitly from `REDISFLOW_*` variables.
    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        for spec in PARAMS {
            if self.values.contains_key(spec.name) {
                continue;
            }
            if let Some(value) = vars.get(&spec.env_var()) {
                self.values.insert(spec.name.to_string(), value.clone());
            }
        }
        self
    }

    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

impl<K, V> FromIterator<(K, V)> for LaunchInput
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_names() {
        assert_eq!(lookup(REDIS_HOST).unwrap().env_var(), "REDISFLOW_REDIS_HOST");
        assert_eq!(
            lookup(WAIT_UNTIL_FINISH).unwrap().env_var(),
            "REDISFLOW_WAIT_UNTIL_FINISH"
        );
        assert_eq!(lookup(PARALLELISM).unwrap().env_var(), "REDISFLOW_PARALLELISM");
    }

    #[test]
    fn test_collect_and_set() {
        let input: LaunchInput = [(REDIS_HOST, "localhost"), (REDIS_PORT, "6379")]
            .into_iter()
            .collect();
        let input = input.set(JOB_NAME, "nightly");

        assert_eq!(input.get(REDIS_HOST), Some("localhost"));
        assert_eq!(input.get(REDIS_PORT), Some("6379"));
        assert_eq!(input.get(JOB_NAME), Some("nightly"));
        assert_eq!(input.get(TEMPLATE_LOCATION), None);
    }

    #[test]
    fn test_env_does_not_override_args() {
        let input = LaunchInput::new()
            .set(REDIS_HOST, "from-args")
            .with_env([
                ("REDISFLOW_REDIS_HOST".to_string(), "from-env".to_string()),
                ("REDISFLOW_REDIS_PORT".to_string(), "6380".to_string()),
                ("UNRELATED".to_string(), "x".to_string()),
            ]);

        assert_eq!(input.get(REDIS_HOST), Some("from-args"));
        assert_eq!(input.get(REDIS_PORT), Some("6380"));
    }
}
