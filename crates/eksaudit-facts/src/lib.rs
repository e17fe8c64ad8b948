//! Fact source adapters
//!
//! Uniform, read-only accessors for the facts a control inspects:
//! - Filesystem metadata (ownership, permission bits, existence)
//! - Service state and start-command flags via systemd
//! - Values inside local JSON/YAML configuration files
//! - Values inside JSON documents served over HTTP
//!
//! Adapters never mutate the target and never interpret facts; judging a
//! fact is the evaluator's job.

pub mod args;
pub mod filesystem;
pub mod http;
pub mod service;
pub mod structured;

pub use args::parse_service_args;
pub use filesystem::FileAdapter;
pub use http::HttpJsonAdapter;
pub use service::SystemdAdapter;
pub use structured::{lookup_key_path, ConfigFormat, StructuredConfigAdapter};

use async_trait::async_trait;
use eksaudit_common::config::AdapterConfig;
use eksaudit_core::fact::SourceKind;
use eksaudit_core::{Fact, FactSelector, FetchError};
use std::time::Duration;
use tracing::debug;

/// Anything that can read a fact from the target
#[async_trait]
pub trait FactSource: Send + Sync {
    /// Read the fact named by a fully rendered selector
    async fn fetch(&self, selector: &FactSelector) -> Result<Fact, FetchError>;
}

/// Dispatches each selector to the adapter for its source kind
pub struct LocalFactSource {
    files: FileAdapter,
    services: SystemdAdapter,
    configs: StructuredConfigAdapter,
    http: HttpJsonAdapter,
}

impl LocalFactSource {
    pub fn new(
        files: FileAdapter,
        services: SystemdAdapter,
        configs: StructuredConfigAdapter,
        http: HttpJsonAdapter,
    ) -> Self {
        Self {
            files,
            services,
            configs,
            http,
        }
    }

    /// Build every adapter from configuration
    pub fn from_config(config: &AdapterConfig) -> eksaudit_core::Result<Self> {
        let files = FileAdapter::new(&config.passwd_path, &config.group_path);
        let services = SystemdAdapter::new(
            &config.systemctl_path,
            Duration::from_secs(config.command_timeout_seconds),
        );
        let http = HttpJsonAdapter::new(Duration::from_secs(config.http_timeout_seconds))?;

        Ok(Self::new(files, services, StructuredConfigAdapter::new(), http))
    }
}

#[async_trait]
impl FactSource for LocalFactSource {
    async fn fetch(&self, selector: &FactSelector) -> Result<Fact, FetchError> {
        debug!("Fetching {}", selector.describe());

        match selector.source_kind() {
            SourceKind::Filesystem => self.files.fetch(selector).await,
            SourceKind::Service => self.services.fetch(selector).await,
            SourceKind::StructuredConfig => self.configs.fetch(selector).await,
            SourceKind::Http => self.http.fetch(selector).await,
        }
    }
}

/// Error for a selector routed to the wrong adapter
pub(crate) fn unsupported(selector: &FactSelector) -> FetchError {
    FetchError::MalformedContent(format!(
        "adapter cannot serve selector: {}",
        selector.describe()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dispatch_by_source_kind() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, r#"{"readOnlyPort": 0}"#).unwrap();

        let source = LocalFactSource::from_config(&AdapterConfig::default()).unwrap();

        let exists = source
            .fetch(&FactSelector::FileExists {
                path: config_path.to_str().unwrap().into(),
            })
            .await
            .unwrap();
        assert_eq!(exists, Fact::Existence(true));

        let value = source
            .fetch(&FactSelector::ConfigValue {
                path: config_path.to_str().unwrap().into(),
                key: vec!["readOnlyPort".into()],
            })
            .await
            .unwrap();
        assert_eq!(value, Fact::Value(serde_json::Value::from(0)));
    }

    #[tokio::test]
    async fn test_adapter_rejects_foreign_selector() {
        let err = StructuredConfigAdapter::new()
            .fetch(&FactSelector::FileMode {
                path: "/etc/hosts".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), eksaudit_core::FetchErrorKind::MalformedContent);
    }
}
