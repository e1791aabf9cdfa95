//! Debugger configuration (`--dlv`)
//!
//! The value is handed to step implementations untouched beyond a syntax
//! check. It is either a string or a map:
//! - `{...}` is parsed as a JSON object
//! - `"..."` is a JSON string literal
//! - `'...'` is a single-quoted string (`\'` and `\\` escapes only)
//! - anything else is taken as a bare string

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Parsed debugger configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DebugConfig {
    Text(String),
    Map(Map<String, Value>),
}

#[derive(Debug, Error)]
pub enum DlvError {
    #[error("unable to parse --dlv option '{input}': {reason}")]
    Parse { input: String, reason: String },
}

impl DebugConfig {
    /// Parse `--dlv` text. Blank input means no configuration.
    pub fn parse(raw: &str) -> Result<Option<Self>, DlvError> {
        let cfg = raw.trim();
        let parse_error = |reason: String| DlvError::Parse {
            input: cfg.to_string(),
            reason,
        };

        match cfg.chars().next() {
            None => Ok(None),
            Some('{') => match serde_json::from_str::<Value>(cfg) {
                Ok(Value::Object(map)) => Ok(Some(DebugConfig::Map(map))),
                Ok(_) => Err(parse_error("expected an object".to_string())),
                Err(e) => Err(parse_error(e.to_string())),
            },
            Some('"') => serde_json::from_str::<String>(cfg)
                .map(|s| Some(DebugConfig::Text(s)))
                .map_err(|e| parse_error(e.to_string())),
            Some('\'') => parse_single_quoted(cfg)
                .map(|s| Some(DebugConfig::Text(s)))
                .map_err(parse_error),
            Some(_) => Ok(Some(DebugConfig::Text(cfg.to_string()))),
        }
    }

    /// The configuration as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            DebugConfig::Text(s) => Value::String(s.clone()),
            DebugConfig::Map(m) => Value::Object(m.clone()),
        }
    }
}

fn parse_single_quoted(cfg: &str) -> Result<String, String> {
    let mut chars = cfg.chars().skip(1);
    let mut out = String::new();

    loop {
        match chars.next() {
            None => return Err("unterminated single-quoted string".to_string()),
            Some('\\') => match chars.next() {
                Some(c @ ('\'' | '\\')) => out.push(c),
                Some(c) => {
                    out.push('\\');
                    out.push(c);
                }
                None => return Err("unterminated single-quoted string".to_string()),
            },
            Some('\'') => break,
            Some(c) => out.push(c),
        }
    }

    let rest: String = chars.collect();
    if !rest.trim().is_empty() {
        return Err(format!("unexpected trailing text '{}'", rest.trim()));
    }
    Ok(out)
}
