//! Structured configuration adapter (JSON / YAML files)

use crate::FactSource;
use async_trait::async_trait;
use eksaudit_core::{Fact, FactSelector, FetchError};
use serde_json::Value;
use std::path::Path;
use tracing::trace;

/// Serialization format of a config file, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Detect the format from the file extension
    ///
    /// Anything other than `.json`, `.yaml` or `.yml` is rejected as malformed
    /// content without touching the file.
    pub fn detect(path: &Path) -> Result<Self, FetchError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            other => Err(FetchError::MalformedContent(format!(
                "{}: unsupported config format '{}' (expected .json, .yaml or .yml)",
                path.display(),
                other.map(|e| format!(".{}", e)).unwrap_or_default()
            ))),
        }
    }

    pub fn parse(&self, content: &str) -> Result<Value, String> {
        match self {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

/// Walk a key path through a document
///
/// Objects are indexed by key and arrays by decimal index. Returns `Null`
/// when any segment is missing.
pub fn lookup_key_path(document: &Value, key: &[String]) -> Value {
    let mut current = document;

    for segment in key {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }

    current.clone()
}

/// Reads values out of local JSON/YAML config files
#[derive(Debug, Clone, Default)]
pub struct StructuredConfigAdapter;

impl StructuredConfigAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Load and parse a whole document
    pub async fn load(&self, path: &str) -> Result<Value, FetchError> {
        let file = Path::new(path);
        let format = ConfigFormat::detect(file)?;

        trace!("Reading {:?} config {}", format, path);
        let content = tokio::fs::read_to_string(file)
            .await
            .map_err(|e| FetchError::from_io(path, &e))?;

        format
            .parse(&content)
            .map_err(|e| FetchError::MalformedContent(format!("{}: {}", path, e)))
    }

    /// Look up one value; an absent key yields `Null`
    pub async fn value(&self, path: &str, key: &[String]) -> Result<Value, FetchError> {
        let document = self.load(path).await?;
        Ok(lookup_key_path(&document, key))
    }
}

#[async_trait]
impl FactSource for StructuredConfigAdapter {
    async fn fetch(&self, selector: &FactSelector) -> Result<Fact, FetchError> {
        match selector {
            FactSelector::ConfigValue { path, key } => Ok(Fact::Value(self.value(path, key).await?)),
            other => Err(crate::unsupported(other)),
        }
    }
}
