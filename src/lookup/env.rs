use std::collections::HashMap;

use serde_json::Value;

use super::{LookupError, Provider};

/// Serves values from environment variables.
///
/// The key `aws.tags.owner` with prefix `ERAFLOW_` reads `ERAFLOW_AWS_TAGS_OWNER`.
/// Variables are captured when the provider is built.
#[derive(Debug, Clone, Default)]
pub struct EnvProvider {
    prefix: String,
    vars: HashMap<String, String>,
}

impl EnvProvider {
    /// Snapshot the process environment, keeping variables that start with `prefix`.
    pub fn from_process(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    /// Build from an explicit set of variables.
    pub fn from_vars<I>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            prefix: prefix.to_string(),
            vars: vars
                .into_iter()
                .filter(|(name, _)| name.starts_with(prefix))
                .collect(),
        }
    }

    /// Variable name consulted for `key`.
    pub fn var_name(&self, key: &str) -> String {
        let body: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, body)
    }
}

impl Provider for EnvProvider {
    fn name(&self) -> &str {
        "environment"
    }

    fn lookup(&self, key: &str) -> Result<Option<Value>, LookupError> {
        Ok(self
            .vars
            .get(&self.var_name(key))
            .map(|v| Value::String(v.clone())))
    }
}
