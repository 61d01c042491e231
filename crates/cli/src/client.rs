//! API client for the fleetscaled HTTP API

use anyhow::{Context, Result};
use fleetscale_lib::{
    health::{HealthResponse, ReadinessResponse},
    models::UsageSample,
    scaling::StatusSnapshot,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

/// Client for one daemon's API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request and decode the JSON body
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// GET a body that is meaningful on both 200 and 503
    async fn get_probe<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.get("status").await
    }

    pub async fn samples(&self) -> Result<Vec<UsageSample>> {
        self.get("samples").await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get_probe("healthz").await
    }

    pub async fn readiness(&self) -> Result<ReadinessResponse> {
        self.get_probe("readyz").await
    }
}
