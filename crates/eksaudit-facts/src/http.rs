//! HTTP+JSON adapter for remote endpoints such as the kubelet `configz` proxy

use crate::structured::lookup_key_path;
use crate::FactSource;
use async_trait::async_trait;
use eksaudit_core::{Error, Fact, FactSelector, FetchError};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Fetches JSON documents with GET and looks up a key path in them
#[derive(Debug, Clone)]
pub struct HttpJsonAdapter {
    client: Client,
    timeout: Duration,
}

impl HttpJsonAdapter {
    pub fn new(timeout: Duration) -> eksaudit_core::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("eksaudit/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(1))
            .no_proxy()
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// GET `url` and parse the body as JSON
    pub async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        debug!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(format!("{} after {:?}", url, self.timeout))
            } else {
                FetchError::NetworkUnreachable(format!("{}: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(format!("{} after {:?}", url, self.timeout))
            } else {
                FetchError::NetworkUnreachable(format!("{}: {}", url, e))
            }
        })?;

        serde_json::from_str(&body)
            .map_err(|e| FetchError::MalformedContent(format!("{}: {}", url, e)))
    }

    /// Fetch and look up one value; an absent key yields `Null`
    pub async fn value(&self, url: &str, key: &[String]) -> Result<Value, FetchError> {
        let document = self.get_json(url).await?;
        Ok(lookup_key_path(&document, key))
    }
}

fn status_error(url: &str, status: StatusCode) -> FetchError {
    let message = format!("{} returned {}", url, status);
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::PermissionDenied(message),
        _ => FetchError::NetworkUnreachable(message),
    }
}

#[async_trait]
impl FactSource for HttpJsonAdapter {
    async fn fetch(&self, selector: &FactSelector) -> Result<Fact, FetchError> {
        match selector {
            FactSelector::HttpJson { url, key } => Ok(Fact::Value(self.value(url, key).await?)),
            other => Err(crate::unsupported(other)),
        }
    }
}
