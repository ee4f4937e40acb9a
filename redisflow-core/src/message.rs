use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Record is the unit flowing into the sink: one value destined for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl FromStr for Record {
    type Err = Error;

    /// Parses `key=value`. The value may itself contain `=`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| Error::Config(format!("record {s:?} is not in key=value form")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::Config(format!("record {s:?} has an empty key")));
        }
        Ok(Record::new(key, value))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let record: Record = "hello_key=hello".parse().unwrap();
        assert_eq!(record, Record::new("hello_key", "hello"));

        let record: Record = "expr=a=b".parse().unwrap();
        assert_eq!(record.value, "a=b");

        let record: Record = "empty=".parse().unwrap();
        assert_eq!(record.value, "");
    }

    #[test]
    fn test_parse_record_errors() {
        assert!("no-separator".parse::<Record>().is_err());
        assert!(" =value".parse::<Record>().is_err());
    }
}
