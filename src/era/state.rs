//! Persisted era state (era_state.json)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::EraError;

/// Schema version for era_state.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "eraflow/era_state@1";

/// File name of the state document inside the state directory
pub const STATE_FILENAME: &str = "era_state.json";

/// A tracked resource and the era it was last confirmed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Full identifier, including the namespace prefix
    pub identifier: String,

    /// Era of the most recent touch
    pub last_touched_era: u64,

    /// Wall-clock time of the most recent touch
    pub touched_at: DateTime<Utc>,
}

impl ResourceRecord {
    /// Identifier with `prefix` removed, or the full identifier when it
    /// does not live under `prefix`.
    pub fn name_under<'a>(&'a self, prefix: &str) -> &'a str {
        self.identifier
            .strip_prefix(prefix)
            .unwrap_or(&self.identifier)
    }
}

/// Era state document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EraStateData {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Most recently started era (0 = none started yet)
    pub era: u64,

    /// When the document was last written
    pub updated_at: DateTime<Utc>,

    /// Resource records keyed by full identifier
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
}

impl Default for EraStateData {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            era: 0,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl EraStateData {
    /// Records whose identifier starts with `prefix`.
    pub fn under_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a ResourceRecord> + 'a {
        self.resources
            .range(prefix.to_string()..)
            .take_while(move |(id, _)| id.starts_with(prefix))
            .map(|(_, record)| record)
    }

    /// Load from file, or start fresh when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, EraError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path)?;
        let data: Self = serde_json::from_str(&json)?;
        if data.schema_version != SCHEMA_VERSION {
            return Err(EraError::Schema {
                path: path.to_path_buf(),
                found: data.schema_version,
            });
        }
        Ok(data)
    }

    /// Write atomically to file (write-then-rename)
    pub fn write_to_file(&self, path: &Path) -> Result<(), EraError> {
        let json = serde_json::to_string_pretty(self)?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &json)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }
}
