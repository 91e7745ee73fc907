use std::path::PathBuf;
use std::time::Duration;

use reqwest::{Client, StatusCode};

use super::error::RetrieveError;
use super::types::{WorkOrderData, WorkOrderId};
use crate::config::{SourceConfig, SourceKind};

/// Fetches everything needed to export one work order.
pub trait WorkOrderSource {
    async fn fetch(&self, id: WorkOrderId) -> Result<WorkOrderData, RetrieveError>;
}

/// Reads `<root>/<id>.json` fixtures.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl WorkOrderSource for DirectorySource {
    async fn fetch(&self, id: WorkOrderId) -> Result<WorkOrderData, RetrieveError> {
        let path = self.root.join(format!("{id}.json"));
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RetrieveError::NotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| RetrieveError::Malformed(format!("{}: {e}", path.display())))
    }
}

/// Fetches `GET {base_url}/workorders/{id}` from the records API.
pub struct HttpSource {
    api_token: String,
    client: Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: String, api_token: String) -> Result<Self, RetrieveError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            api_token,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl WorkOrderSource for HttpSource {
    async fn fetch(&self, id: WorkOrderId) -> Result<WorkOrderData, RetrieveError> {
        let mut request = self
            .client
            .get(format!("{}/workorders/{id}", self.base_url))
            .header("accept", "application/json");
        if !self.api_token.is_empty() {
            request = request.bearer_auth(&self.api_token);
        }
        let response = request.send().await?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(RetrieveError::NotFound(id));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(RetrieveError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RetrieveError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| RetrieveError::Malformed(e.to_string()))
    }
}

/// The source selected by configuration.
pub enum ConfiguredSource {
    Directory(DirectorySource),
    Http(HttpSource),
}

impl ConfiguredSource {
    pub fn from_config(source: &SourceConfig, data_dir: &std::path::Path) -> Result<Self, RetrieveError> {
        match source.kind {
            SourceKind::Directory => Ok(Self::Directory(DirectorySource::new(
                source
                    .directory
                    .clone()
                    .unwrap_or_else(|| data_dir.join("workorders")),
            ))),
            SourceKind::Http => {
                let base_url = source.base_url.clone().ok_or_else(|| {
                    RetrieveError::Malformed("source.base_url is required for the http source".into())
                })?;
                Ok(Self::Http(HttpSource::new(base_url, source.api_token.clone())?))
            }
        }
    }
}

impl WorkOrderSource for ConfiguredSource {
    async fn fetch(&self, id: WorkOrderId) -> Result<WorkOrderData, RetrieveError> {
        match self {
            Self::Directory(source) => source.fetch(id).await,
            Self::Http(source) => source.fetch(id).await,
        }
    }
}
