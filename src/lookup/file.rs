use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde_json::Value;
use tracing::debug;

use super::{walk_value, LookupError, Provider};

/// Serves values from a TOML or JSON data file.
///
/// The file is read on first lookup and the outcome (including a failure)
/// is kept for the life of the provider. A file that does not exist holds
/// no values.
#[derive(Debug)]
pub struct DataFileProvider {
    path: PathBuf,
    data: OnceLock<Result<Value, LookupError>>,
}

impl DataFileProvider {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            data: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn data(&self) -> &Result<Value, LookupError> {
        self.data.get_or_init(|| load_data_file(&self.path))
    }
}

impl Provider for DataFileProvider {
    fn name(&self) -> &str {
        "file"
    }

    fn lookup(&self, key: &str) -> Result<Option<Value>, LookupError> {
        match self.data() {
            Ok(root) => Ok(walk_value(root, key).cloned()),
            Err(e) => Err(e.clone()),
        }
    }
}

/// Read a data file into a JSON value. `.json` files are parsed as JSON,
/// everything else as TOML.
pub(crate) fn load_data_file(path: &Path) -> Result<Value, LookupError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "data file not present");
            return Ok(Value::Object(serde_json::Map::new()));
        }
        Err(e) => {
            return Err(LookupError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(&contents).map_err(|e| LookupError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    } else {
        let value: toml::Value = toml::from_str(&contents).map_err(|e| LookupError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(toml_to_json(value))
    }
}

/// Convert TOML Value to JSON Value
pub(crate) fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.toml");
        fs::write(&path, "[aws]\nregion = \"us-east-1\"\n[aws.tags]\nowner = \"bob\"\n").unwrap();

        let provider = DataFileProvider::new(path);
        assert_eq!(provider.lookup("aws.region").unwrap(), Some(json!("us-east-1")));
        assert_eq!(provider.lookup("aws.tags").unwrap(), Some(json!({"owner": "bob"})));
        assert_eq!(provider.lookup("aws.zone").unwrap(), None);
    }

    #[test]
    fn test_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, r#"{"foobernetes": {"webservers": 4}}"#).unwrap();

        let provider = DataFileProvider::new(path);
        assert_eq!(provider.lookup("foobernetes.webservers").unwrap(), Some(json!(4)));
    }

    #[test]
    fn test_missing_file_has_no_values() {
        let dir = TempDir::new().unwrap();
        let provider = DataFileProvider::new(dir.path().join("absent.toml"));
        assert_eq!(provider.lookup("anything").unwrap(), None);
    }

    #[test]
    fn test_parse_error_is_reported_each_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();

        let provider = DataFileProvider::new(path);
        assert!(matches!(provider.lookup("a"), Err(LookupError::Parse { .. })));
        assert!(matches!(provider.lookup("b"), Err(LookupError::Parse { .. })));
    }

    #[test]
    fn test_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let provider = DataFileProvider::new(dir.path().to_path_buf());
        assert!(matches!(provider.lookup("a"), Err(LookupError::Io { .. })));
    }

    #[test]
    fn test_toml_to_json() {
        let value: toml::Value = toml::from_str("n = 1\nf = 1.5\nb = false\nlist = [\"x\"]").unwrap();
        assert_eq!(
            toml_to_json(value),
            json!({"n": 1, "f": 1.5, "b": false, "list": ["x"]})
        );
    }
}
