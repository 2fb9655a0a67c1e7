use crate::error::{CommonError, CommonResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PREFIX: &str = "markup";

/// Qualified name of a component or library definition (`markup://ns:name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefDescriptor {
    pub prefix: String,
    pub namespace: String,
    pub name: String,
}

impl DefDescriptor {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses `prefix://ns:name` or bare `ns:name`
    pub fn parse(raw: &str) -> CommonResult<Self> {
        let invalid = || CommonError::InvalidDescriptor {
            descriptor: raw.to_string(),
        };
        let (prefix, rest) = match raw.split_once("://") {
            Some((prefix, rest)) if !prefix.is_empty() => (prefix, rest),
            Some(_) => return Err(invalid()),
            None => (DEFAULT_PREFIX, raw),
        };
        let (namespace, name) = rest.split_once(':').ok_or_else(invalid)?;
        if namespace.is_empty() || name.is_empty() || name.contains(':') {
            return Err(invalid());
        }
        Ok(Self {
            prefix: prefix.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    /// `ns:name`
    pub fn qualified(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

impl fmt::Display for DefDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.prefix, self.namespace, self.name)
    }
}

impl FromStr for DefDescriptor {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DefDescriptor::parse(s)
    }
}
