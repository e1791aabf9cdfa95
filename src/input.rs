//! Overlay input from the command line
//!
//! `--data key=value` flags and an optional `--data-file` holding a table of
//! values. Nested tables in the file are flattened to dotted keys; flags
//! override file entries with the same key.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::lookup::toml_to_json;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("invalid overlay assignment '{0}': expected KEY=VALUE")]
    InvalidAssignment(String),

    #[error("unable to read overlay file {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("unable to parse overlay file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("overlay file {}: value of '{key}' must be a string, number or boolean", .path.display())]
    NotScalar { path: PathBuf, key: String },

    #[error("overlay file {}: key '{key}' is given more than once", .path.display())]
    DuplicateKey { path: PathBuf, key: String },
}

/// Parse a `KEY=VALUE` flag. The value may be empty or contain `=`.
pub fn parse_assignment(raw: &str) -> Result<(String, String), InputError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(InputError::InvalidAssignment(raw.to_string())),
    }
}

/// Read a TOML or JSON overlay file into flat dotted keys.
pub fn load_overlay_file(path: &Path) -> Result<BTreeMap<String, String>, InputError> {
    let contents = fs::read_to_string(path).map_err(|e| InputError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let parse_error = |message: String| InputError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let root: Value = if is_json {
        serde_json::from_str(&contents).map_err(|e| parse_error(e.to_string()))?
    } else {
        let table: toml::Value = toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?;
        toml_to_json(table)
    };

    let Value::Object(map) = root else {
        return Err(parse_error("top level must be a table".to_string()));
    };

    let mut out = BTreeMap::new();
    for (key, value) in map {
        flatten_into(path, key, value, &mut out)?;
    }
    Ok(out)
}

fn flatten_into(path: &Path, key: String, value: Value, out: &mut BTreeMap<String, String>) -> Result<(), InputError> {
    let scalar = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(map) => {
            for (child, v) in map {
                flatten_into(path, format!("{}.{}", key, child), v, out)?;
            }
            return Ok(());
        }
        Value::Array(_) | Value::Null => {
            return Err(InputError::NotScalar {
                path: path.to_path_buf(),
                key,
            })
        }
    };
    // `"a.b"` and `[a] b` spell the same key
    if out.contains_key(&key) {
        return Err(InputError::DuplicateKey {
            path: path.to_path_buf(),
            key,
        });
    }
    out.insert(key, scalar);
    Ok(())
}

/// Combine the overlay file (if any) with flag assignments.
pub fn collect_overlay(
    data_file: Option<&Path>,
    assignments: &[(String, String)],
) -> Result<BTreeMap<String, String>, InputError> {
    let mut overlay = match data_file {
        Some(path) => load_overlay_file(path)?,
        None => BTreeMap::new(),
    };
    for (key, value) in assignments {
        overlay.insert(key.clone(), value.clone());
    }
    Ok(overlay)
}
