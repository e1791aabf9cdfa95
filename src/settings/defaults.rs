//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

/// Built-in default settings values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// State directory (default: ".eraflow/state")
    pub state_dir: String,

    /// Resource working directory for built-in steps (default: ".eraflow/work")
    pub workdir: String,

    /// Lookup data file (default: "data.toml")
    pub data_file: String,

    /// Environment lookup prefix (default: "ERAFLOW_")
    pub env_prefix: String,

    /// State lock timeout in seconds (default: 30)
    pub lock_timeout_seconds: u64,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            state_dir: ".eraflow/state".to_string(),
            workdir: ".eraflow/work".to_string(),
            data_file: "data.toml".to_string(),
            env_prefix: "ERAFLOW_".to_string(),
            lock_timeout_seconds: 30,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "state_dir": self.state_dir,
            "workdir": self.workdir,
            "lookup": {
                "data_file": self.data_file,
                "env_prefix": self.env_prefix
            },
            "lock": {
                "timeout_seconds": self.lock_timeout_seconds
            }
        })
    }
}
