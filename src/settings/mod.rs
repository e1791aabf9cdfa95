//! Application settings
//!
//! Settings are merged from three layers, later layers winning:
//! 1. Built-in defaults
//! 2. Settings file (.eraflow/config.toml)
//! 3. CLI flags

mod defaults;
mod effective;
mod merge;

pub use defaults::BuiltinDefaults;
pub use effective::{EffectiveSettings, SettingsError, SettingsOrigin, SettingsSource};
pub use merge::{deep_merge, merge_layers};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default settings file, relative to the working directory
pub const DEFAULT_SETTINGS_PATH: &str = ".eraflow/config.toml";

/// Typed view of the merged settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding era_state.json and the state lock
    pub state_dir: PathBuf,

    /// Directory where built-in steps place their resources
    pub workdir: PathBuf,

    pub lookup: LookupSettings,

    pub lock: LockSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupSettings {
    /// Data file consulted last in the lookup chain (empty = none)
    pub data_file: String,

    /// Prefix of environment variables consulted by lookups
    pub env_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSettings {
    /// How long to wait for the state lock
    pub timeout_seconds: u64,
}

impl Settings {
    pub fn data_file(&self) -> Option<PathBuf> {
        if self.lookup.data_file.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.lookup.data_file))
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock.timeout_seconds)
    }
}
