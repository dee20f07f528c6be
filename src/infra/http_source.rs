use crate::app::ports::DataSourcePort;
use crate::config::SourceConfig;
use crate::error::{PipelineError, Result};
use crate::types::Selectors;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use std::time::Duration;
use tracing::debug;

/// Web API source: `GET {base_url}/{identifier}` with selectors as query
/// parameters (`geo`, `start`, `end`, `fields`).
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| PipelineError::Config("source.base_url is not set".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| PipelineError::Config(format!("invalid api key: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn query_params(selectors: &Selectors) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if !selectors.regions.is_empty() {
            params.push(("geo", selectors.regions.join(",")));
        }
        if let Some(range) = selectors.date_range {
            params.push(("start", range.start.format("%Y-%m-%d").to_string()));
            params.push(("end", range.end.format("%Y-%m-%d").to_string()));
        }
        if !selectors.fields.is_empty() {
            params.push(("fields", selectors.fields.join(",")));
        }
        params
    }
}

#[async_trait]
impl DataSourcePort for HttpSource {
    async fn get(&self, identifier: &str, selectors: &Selectors) -> std::result::Result<Vec<u8>, String> {
        if identifier.is_empty() || identifier.chars().any(|c| matches!(c, '/' | '?' | '#') || c.is_whitespace()) {
            return Err(format!("identifier '{}' is not URL-safe", identifier));
        }
        let url = format!("{}/{}", self.base_url, identifier);
        debug!(url = %url, "GET");

        let resp = self
            .client
            .get(&url)
            .query(&Self::query_params(selectors))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("HTTP {} from {}", status.as_u16(), url));
        }
        let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
