//! Table-service metric store
//!
//! Talks to an Azure-Table-compatible REST endpoint:
//! - upsert is an insert-or-replace `PUT` on `table(PartitionKey='..',RowKey='..')`
//! - listing is a `$filter` query on the fleet partition, following
//!   continuation headers until the partition is exhausted
//! - requests are signed with the `SharedKeyLite` scheme

use super::MetricStore;
use crate::config::StoreSettings;
use crate::error::{ScaleError, ScaleResult};
use crate::models::UsageSample;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const STORAGE_API_VERSION: &str = "2019-02-02";
const ODATA_NO_METADATA: &str = "application/json;odata=nometadata";
const CONTINUATION_PARTITION: &str = "x-ms-continuation-NextPartitionKey";
const CONTINUATION_ROW: &str = "x-ms-continuation-NextRowKey";

/// Sign a canonical string with the account key (base64 HMAC-SHA256)
pub fn shared_key_signature(key: &[u8], string_to_sign: &str) -> ScaleResult<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ScaleError::Configuration(format!("invalid storage key: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Table row for one node's sample
#[derive(Debug, Serialize, Deserialize)]
struct TableEntity {
    #[serde(rename = "PartitionKey")]
    partition_key: String,
    #[serde(rename = "RowKey")]
    row_key: String,
    #[serde(rename = "CPUUsagePercentage")]
    cpu_usage_percentage: f64,
    #[serde(rename = "ResourceGroup")]
    resource_group: String,
    #[serde(rename = "ObservedAt", serialize_with = "serialize_edm_datetime")]
    observed_at: DateTime<Utc>,
    #[serde(rename = "ObservedAt@odata.type", default)]
    observed_at_type: String,
}

/// `Edm.DateTime` stores at most microsecond precision
fn serialize_edm_datetime<S: serde::Serializer>(
    value: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
}

impl TableEntity {
    fn from_sample(sample: &UsageSample) -> Self {
        Self {
            partition_key: sample.fleet_id.clone(),
            row_key: sample.node_id.clone(),
            cpu_usage_percentage: sample.cpu_percent,
            resource_group: sample.fleet_id.clone(),
            observed_at: sample.observed_at,
            observed_at_type: "Edm.DateTime".to_string(),
        }
    }

    fn into_sample(self) -> ScaleResult<UsageSample> {
        let node = self.row_key.clone();
        UsageSample::new(
            self.row_key,
            self.partition_key,
            self.cpu_usage_percentage,
            self.observed_at,
        )
        .map_err(|e| ScaleError::Store(format!("stored sample for node {} is invalid: {}", node, e)))
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    value: Vec<TableEntity>,
}

/// Extract the continuation keys of a paged query response
fn continuation_from_headers(headers: &HeaderMap) -> Option<(String, String)> {
    let partition = headers.get(CONTINUATION_PARTITION)?.to_str().ok()?;
    let row = headers
        .get(CONTINUATION_ROW)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Some((partition.to_string(), row.to_string()))
}

/// Quote a key for use inside an entity address
fn quote_key(key: &str) -> String {
    key.replace('\'', "''")
}

/// Metric store backed by a table service
pub struct TableMetricStore {
    client: Client,
    endpoint: Url,
    account: String,
    key: Vec<u8>,
    table_name: String,
    table_ready: AtomicBool,
}

impl TableMetricStore {
    /// Create a store client; `timeout` bounds every HTTP request
    pub fn new(settings: &StoreSettings, timeout: Duration) -> ScaleResult<Self> {
        let key = STANDARD.decode(settings.key.trim()).map_err(|e| {
            ScaleError::Configuration(format!("credentials.storage_key is not valid base64: {}", e))
        })?;

        let mut endpoint = settings.endpoint.clone();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            ScaleError::Configuration(format!("invalid table endpoint {}: {}", settings.endpoint, e))
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScaleError::Store(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            account: settings.account.clone(),
            key,
            table_name: settings.table_name.clone(),
            table_ready: AtomicBool::new(false),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn url_for(&self, resource: &str) -> ScaleResult<Url> {
        self.endpoint
            .join(resource)
            .map_err(|e| ScaleError::Store(format!("invalid table resource {}: {}", resource, e)))
    }

    /// Build a signed request
    fn signed(&self, method: Method, url: Url) -> ScaleResult<RequestBuilder> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let string_to_sign = format!("{}\n/{}{}", date, self.account, url.path());
        let signature = shared_key_signature(&self.key, &string_to_sign)?;

        Ok(self
            .client
            .request(method, url)
            .header("x-ms-date", date)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("DataServiceVersion", "3.0;NetFx")
            .header("MaxDataServiceVersion", "3.0;NetFx")
            .header("Accept", ODATA_NO_METADATA)
            .header(
                "Authorization",
                format!("SharedKeyLite {}:{}", self.account, signature),
            ))
    }

    /// Create the table unless a previous call already did
    async fn ensure_table(&self) -> ScaleResult<()> {
        if self.table_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let url = self.url_for("Tables")?;
        let response = self
            .signed(Method::POST, url)?
            .json(&serde_json::json!({ "TableName": self.table_name }))
            .send()
            .await
            .map_err(|e| ScaleError::Store(format!("create table request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            if status != StatusCode::CONFLICT {
                info!(table = %self.table_name, "Created metric table");
            }
            self.table_ready.store(true, Ordering::Release);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ScaleError::Store(format!(
                "create table {} failed ({}): {}",
                self.table_name, status, body
            )))
        }
    }
}

#[async_trait]
impl MetricStore for TableMetricStore {
    async fn upsert(&self, sample: &UsageSample) -> ScaleResult<()> {
        self.ensure_table().await?;

        let resource = format!(
            "{}(PartitionKey='{}',RowKey='{}')",
            self.table_name,
            quote_key(&sample.fleet_id),
            quote_key(&sample.node_id)
        );
        let url = self.url_for(&resource)?;

        let response = self
            .signed(Method::PUT, url)?
            .json(&TableEntity::from_sample(sample))
            .send()
            .await
            .map_err(|e| ScaleError::Store(format!("upsert request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScaleError::Store(format!(
                "upsert for node {} failed ({}): {}",
                sample.node_id, status, body
            )));
        }

        debug!(
            node_id = %sample.node_id,
            fleet_id = %sample.fleet_id,
            status = status.as_u16(),
            "Upserted usage sample"
        );
        Ok(())
    }

    async fn list_samples(&self, fleet_id: &str) -> ScaleResult<Vec<UsageSample>> {
        let filter = format!("PartitionKey eq '{}'", quote_key(fleet_id));
        let mut samples = Vec::new();
        let mut continuation: Option<(String, String)> = None;

        loop {
            let mut url = self.url_for(&format!("{}()", self.table_name))?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("$filter", &filter);
                if let Some((partition, row)) = &continuation {
                    query.append_pair("NextPartitionKey", partition);
                    if !row.is_empty() {
                        query.append_pair("NextRowKey", row);
                    }
                }
            }

            let response = self
                .signed(Method::GET, url)?
                .send()
                .await
                .map_err(|e| ScaleError::Store(format!("query request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ScaleError::Store(format!(
                    "query for fleet {} failed ({}): {}",
                    fleet_id, status, body
                )));
            }

            continuation = continuation_from_headers(response.headers());
            let page: QueryResponse = response
                .json()
                .await
                .map_err(|e| ScaleError::Store(format!("malformed query response: {}", e)))?;

            for entity in page.value {
                samples.push(entity.into_sample()?);
            }

            if continuation.is_none() {
                break;
            }
        }

        Ok(samples)
    }
}
