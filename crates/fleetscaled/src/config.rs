//! Daemon configuration loading
//!
//! The fleet document is read from a local path or downloaded from an
//! `http(s)` URL, then layered with `FLEETSCALE__<SECTION>__<FIELD>`
//! environment overrides.

use anyhow::{Context, Result};
use fleetscale_lib::config::FleetConfig;
use std::time::Duration;
use tracing::info;

const ENV_PREFIX: &str = "FLEETSCALE";
const ENV_SEPARATOR: &str = "__";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Fetch the raw configuration document
pub async fn read_document(source: &str) -> Result<String> {
    if is_remote(source) {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("failed to create HTTP client")?;
        let response = client
            .get(source)
            .send()
            .await
            .with_context(|| format!("failed to download configuration from {}", source))?
            .error_for_status()
            .with_context(|| format!("configuration download from {} was rejected", source))?;
        Ok(response.text().await?)
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("failed to read configuration file {}", source))
    }
}

/// Parse a document and apply environment overrides
pub fn layer(document: &str) -> Result<FleetConfig> {
    let layered = config::Config::builder()
        .add_source(config::File::from_str(document, config::FileFormat::Json))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()
        .context("invalid configuration document")?;

    layered
        .try_deserialize()
        .context("configuration document does not match the expected shape")
}

/// Load the fleet configuration for `resource_group`
///
/// The resource group given on the command line replaces the document's.
pub async fn load(source: &str, resource_group: &str) -> Result<FleetConfig> {
    let document = read_document(source).await?;
    let config = layer(&document)?.with_resource_group(resource_group);
    info!(
        source = %source,
        resource_group = %resource_group,
        "Configuration loaded"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DOCUMENT: &str = r#"{
        "credentials": {
            "tenant": "tenant-1",
            "client_id": "client-1",
            "client_secret": "secret",
            "subscription_id": "sub-1",
            "storage_account": "fleetstore",
            "storage_key": "c2VjcmV0LWtleQ=="
        },
        "resource_group": "from-document",
        "upper_threshold_percent": 75.0,
        "target_node_count": 4,
        "autoscale": {"monitor_interval_secs": 15},
        "template": {"capacity_parameter": "slaveCount"},
        "endpoints": {"table": null}
    }"#;

    #[tokio::test]
    async fn test_load_from_file_overrides_resource_group() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, DOCUMENT).await.unwrap();

        let config = load(path.to_str().unwrap(), "from-cli").await.unwrap();
        let settings = config.controller_settings().unwrap();

        assert_eq!(settings.resource_group, "from-cli");
        assert_eq!(settings.upper_threshold_percent, 75.0);
        assert_eq!(settings.monitor_interval, Duration::from_secs(15));
        assert_eq!(settings.template.capacity_parameter, "slaveCount");
        assert_eq!(settings.store.endpoint, "https://fleetstore.table.core.windows.net");
    }

    #[tokio::test]
    async fn test_load_from_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fleet.json")
            .with_status(200)
            .with_body(DOCUMENT)
            .create_async()
            .await;

        let config = load(&format!("{}/fleet.json", server.url()), "rg-prod")
            .await
            .unwrap();

        assert_eq!(config.target_node_count, Some(4));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_download_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fleet.json")
            .with_status(404)
            .create_async()
            .await;

        let result = load(&format!("{}/fleet.json", server.url()), "rg-prod").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = load(dir.path().join("absent.json").to_str().unwrap(), "rg").await;
        assert!(result.is_err());
    }

    #[test]
    fn test_environment_override() {
        std::env::set_var("FLEETSCALE__AUTOSCALE__COOLDOWN_SECS", "42");
        let config = layer(DOCUMENT).unwrap();
        std::env::remove_var("FLEETSCALE__AUTOSCALE__COOLDOWN_SECS");

        assert_eq!(config.autoscale.cooldown_secs, 42);
        assert_eq!(config.autoscale.monitor_interval_secs, 15);
    }

    #[test]
    fn test_invalid_document() {
        assert!(layer("{not json").is_err());
    }
}
