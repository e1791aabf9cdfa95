//! Layered configuration lookup
//!
//! A [`LayeredLookup`] asks an ordered list of providers for a dotted key
//! and returns the first hit. The usual chain for a run is
//! overlay → environment → data file, highest precedence first.
//!
//! Providers never mutate after construction, so one lookup can be shared
//! by any number of readers.

mod env;
mod file;
mod overlay;

pub use env::EnvProvider;
pub use file::DataFileProvider;
pub(crate) use file::toml_to_json;
pub use overlay::OverlayProvider;

use std::path::PathBuf;

use eraflow_overlay::split_key;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{trace, warn};

/// Errors a provider can report for a single lookup.
///
/// These never fail a resolution: the chain logs them and moves on to the
/// next provider.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("I/O error reading {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("parse error in {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}

/// A single source of configuration values.
pub trait Provider: Send + Sync {
    /// Short name used in provenance and logs.
    fn name(&self) -> &str;

    /// `Ok(None)` when this provider has no value for `key`.
    fn lookup(&self, key: &str) -> Result<Option<Value>, LookupError>;
}

/// A resolved value and the provider it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved {
    pub value: Value,
    pub origin: String,
}

/// Ordered provider chain; first match wins.
#[derive(Default)]
pub struct LayeredLookup {
    providers: Vec<Box<dyn Provider>>,
}

impl LayeredLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider with lower precedence than those already added.
    pub fn with_provider(mut self, provider: impl Provider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn push(&mut self, provider: Box<dyn Provider>) {
        self.providers.push(provider);
    }

    /// Provider names in precedence order.
    pub fn chain(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve `key` against the chain.
    ///
    /// Malformed keys resolve to `None`.
    pub fn resolve(&self, key: &str) -> Option<Resolved> {
        if split_key(key).is_err() {
            return None;
        }

        for provider in &self.providers {
            match provider.lookup(key) {
                Ok(Some(value)) => {
                    trace!(key, origin = provider.name(), "resolved");
                    return Some(Resolved {
                        value,
                        origin: provider.name().to_string(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key, provider = provider.name(), error = %e, "lookup provider failed, trying next");
                }
            }
        }
        trace!(key, "not found");
        None
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.resolve(key).map(|r| r.value)
    }

    /// Scalar value rendered as a string; `None` for missing keys, objects
    /// and arrays.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// String value, or `default` when the key resolves to nothing usable.
    pub fn get_str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }
}

/// Walk a JSON value along a dotted key.
pub(crate) fn walk_value<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    let segments = split_key(key).ok()?;
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eraflow_overlay::merge;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn overlay(pairs: &[(&str, &str)]) -> OverlayProvider {
        OverlayProvider::new(merge(pairs.iter().map(|(k, v)| (*k, *v))).unwrap())
    }

    fn env(pairs: &[(&str, &str)]) -> EnvProvider {
        EnvProvider::from_vars("ERAFLOW_", pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    fn data_file(contents: &str) -> (NamedTempFile, DataFileProvider) {
        let mut temp = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(temp, "{}", contents).unwrap();
        let provider = DataFileProvider::new(temp.path().to_path_buf());
        (temp, provider)
    }

    #[test]
    fn test_first_provider_wins() {
        let (_file, file) = data_file("[aws]\nregion = \"eu-west-1\"\n");
        let lookup = LayeredLookup::new()
            .with_provider(overlay(&[("aws.region", "us-east-1")]))
            .with_provider(env(&[("ERAFLOW_AWS_REGION", "ap-south-1")]))
            .with_provider(file);

        let resolved = lookup.resolve("aws.region").unwrap();
        assert_eq!(resolved.value, json!("us-east-1"));
        assert_eq!(resolved.origin, "overlay");
    }

    #[test]
    fn test_falls_through_to_file() {
        let (_file, file) = data_file("[aws]\nzone = \"b\"\n");
        let lookup = LayeredLookup::new()
            .with_provider(overlay(&[("aws.region", "us-east-1")]))
            .with_provider(env(&[]))
            .with_provider(file);

        let resolved = lookup.resolve("aws.zone").unwrap();
        assert_eq!(resolved.value, json!("b"));
        assert_eq!(resolved.origin, "file");
    }

    #[test]
    fn test_env_beats_file() {
        let (_file, file) = data_file("[aws]\nregion = \"eu-west-1\"\n");
        let lookup = LayeredLookup::new()
            .with_provider(overlay(&[]))
            .with_provider(env(&[("ERAFLOW_AWS_REGION", "ap-south-1")]))
            .with_provider(file);

        assert_eq!(lookup.get_str("aws.region").as_deref(), Some("ap-south-1"));
    }

    #[test]
    fn test_missing_everywhere_is_none() {
        let lookup = LayeredLookup::new()
            .with_provider(overlay(&[("aws.tags.owner", "alice")]))
            .with_provider(env(&[]));

        assert!(lookup.resolve("aws.tags.missing").is_none());
    }

    #[test]
    fn test_malformed_keys_are_none() {
        let lookup = LayeredLookup::new().with_provider(overlay(&[("a.b", "x")]));
        for key in ["", ".", "...", "a..b"] {
            assert!(lookup.resolve(key).is_none(), "key {:?}", key);
        }
    }

    #[test]
    fn test_broken_file_falls_through() {
        let (_file, broken) = data_file("this is = = not toml");
        let lookup = LayeredLookup::new()
            .with_provider(broken)
            .with_provider(env(&[("ERAFLOW_NAME", "fallback")]));

        assert_eq!(lookup.get_str("name").as_deref(), Some("fallback"));
    }

    #[test]
    fn test_chain_order() {
        let lookup = LayeredLookup::new()
            .with_provider(overlay(&[]))
            .with_provider(env(&[]))
            .with_provider(DataFileProvider::new(PathBuf::from("data.toml")));

        assert_eq!(lookup.chain(), vec!["overlay", "environment", "file"]);
    }

    #[test]
    fn test_get_str_renders_scalars() {
        let (_file, file) = data_file("count = 3\nenabled = true\n[nested]\nx = 1\n");
        let lookup = LayeredLookup::new().with_provider(file);

        assert_eq!(lookup.get_str("count").as_deref(), Some("3"));
        assert_eq!(lookup.get_str("enabled").as_deref(), Some("true"));
        assert_eq!(lookup.get_str("nested"), None);
        assert_eq!(lookup.get_str_or("absent", "dflt"), "dflt");
    }

    #[test]
    fn test_concurrent_readers() {
        let lookup = LayeredLookup::new().with_provider(overlay(&[("a.b", "x"), ("c", "y")]));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    assert_eq!(lookup.get_str("a.b").as_deref(), Some("x"));
                    assert_eq!(lookup.get_str("c").as_deref(), Some("y"));
                });
            }
        });
    }

    #[test]
    fn test_walk_value() {
        let value = json!({"a": {"b": {"c": 1}}, "s": "leaf"});
        assert_eq!(walk_value(&value, "a.b.c"), Some(&json!(1)));
        assert_eq!(walk_value(&value, "s.x"), None);
        assert_eq!(walk_value(&value, "a..b"), None);
    }
}
