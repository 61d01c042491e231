//! Fleet configuration document
//!
//! The document is deserialized as-is (every required field is optional
//! at this stage) and then narrowed into role-specific settings. A missing
//! required field is reported as [`ScaleError::Configuration`] naming the
//! field; nothing required is ever silently defaulted.

use crate::error::{ScaleError, ScaleResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Raw configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub credentials: Credentials,
    pub resource_group: Option<String>,
    pub upper_threshold_percent: Option<f64>,
    pub target_node_count: Option<u32>,
    #[serde(default)]
    pub autoscale: AutoscaleSettings,
    #[serde(default)]
    pub template: TemplateSettings,
    #[serde(default)]
    pub endpoints: Endpoints,
}

/// Service principal and storage credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub tenant: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub subscription_id: Option<String>,
    pub storage_account: Option<String>,
    pub storage_key: Option<String>,
}

/// Loop timings and decision tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscaleSettings {
    /// Consecutive overload readings required to scale up
    #[serde(default = "default_trigger_count")]
    pub trigger_count: u32,
    /// Controller aggregate read interval in seconds
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    /// Reporter publish interval in seconds
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
    /// Delay between the two CPU counter snapshots in seconds
    #[serde(default = "default_sample_delay")]
    pub sample_delay_secs: u64,
    /// Deployment status poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Stabilization delay after a successful scale-up in seconds
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Deadline for each store, provisioning or token call in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Reuse access tokens until shortly before they expire
    #[serde(default)]
    pub cache_tokens: bool,
}

fn default_trigger_count() -> u32 {
    3
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_publish_interval() -> u64 {
    30
}

fn default_sample_delay() -> u64 {
    5
}

fn default_poll_interval() -> u64 {
    60
}

fn default_cooldown() -> u64 {
    600
}

fn default_call_timeout() -> u64 {
    30
}

impl Default for AutoscaleSettings {
    fn default() -> Self {
        Self {
            trigger_count: default_trigger_count(),
            monitor_interval_secs: default_monitor_interval(),
            publish_interval_secs: default_publish_interval(),
            sample_delay_secs: default_sample_delay(),
            poll_interval_secs: default_poll_interval(),
            cooldown_secs: default_cooldown(),
            call_timeout_secs: default_call_timeout(),
            cache_tokens: false,
        }
    }
}

/// Where and how the deployment template is cached and resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    #[serde(default = "default_template_directory")]
    pub directory: PathBuf,
    /// Existing deployment whose template seeds the cache
    #[serde(default = "default_seed_deployment")]
    pub seed_deployment: String,
    /// Template parameter holding the node count
    #[serde(default = "default_capacity_parameter")]
    pub capacity_parameter: String,
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    /// Resource type counted to position the next node
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
}

fn default_template_directory() -> PathBuf {
    PathBuf::from("./files")
}

fn default_seed_deployment() -> String {
    "SwarmSlaveNodes".to_string()
}

fn default_capacity_parameter() -> String {
    "slaveCount".to_string()
}

fn default_placeholder() -> String {
    "(INDEX)".to_string()
}

fn default_resource_type() -> String {
    "Microsoft.Compute/virtualMachines/extensions".to_string()
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            directory: default_template_directory(),
            seed_deployment: default_seed_deployment(),
            capacity_parameter: default_capacity_parameter(),
            placeholder: default_placeholder(),
            resource_type: default_resource_type(),
        }
    }
}

impl TemplateSettings {
    pub fn cache_path(&self) -> PathBuf {
        self.directory.join("deploymentTemplate.json")
    }
}

/// Service endpoints, overridable for sovereign clouds and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoints {
    #[serde(default = "default_management")]
    pub management: String,
    #[serde(default = "default_authority")]
    pub authority: String,
    /// Table service base URL; derived from the storage account when unset
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_table_name")]
    pub table_name: String,
}

fn default_management() -> String {
    "https://management.azure.com".to_string()
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_table_name() -> String {
    "diagnosticsTable".to_string()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            management: default_management(),
            authority: default_authority(),
            table: None,
            table_name: default_table_name(),
        }
    }
}

/// Storage account access shared by both roles
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub account: String,
    pub key: String,
    pub endpoint: String,
    pub table_name: String,
}

/// Validated settings for the controller role
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub tenant: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub upper_threshold_percent: f64,
    pub target_node_count: u32,
    pub trigger_count: u32,
    pub monitor_interval: Duration,
    pub poll_interval: Duration,
    pub cooldown: Duration,
    pub call_timeout: Duration,
    pub cache_tokens: bool,
    pub template: TemplateSettings,
    pub management_endpoint: String,
    pub authority_endpoint: String,
    pub store: StoreSettings,
}

/// Validated settings for the reporter role
#[derive(Debug, Clone)]
pub struct ReporterSettings {
    pub resource_group: String,
    pub publish_interval: Duration,
    pub sample_delay: Duration,
    pub call_timeout: Duration,
    pub store: StoreSettings,
}

fn required<T: Clone>(value: &Option<T>, field: &str) -> ScaleResult<T> {
    value
        .clone()
        .ok_or_else(|| ScaleError::Configuration(format!("{} cannot be empty", field)))
}

fn required_str(value: &Option<String>, field: &str) -> ScaleResult<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ScaleError::Configuration(format!(
            "{} cannot be empty",
            field
        ))),
    }
}

fn positive_secs(secs: u64, field: &str) -> ScaleResult<Duration> {
    if secs == 0 {
        return Err(ScaleError::Configuration(format!(
            "{} must be greater than zero",
            field
        )));
    }
    Ok(Duration::from_secs(secs))
}

impl FleetConfig {
    /// Parse a JSON configuration document
    pub fn from_json(content: &str) -> ScaleResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| ScaleError::Configuration(format!("invalid configuration document: {}", e)))
    }

    /// Replace the resource group with the one given on the command line
    pub fn with_resource_group(mut self, resource_group: impl Into<String>) -> Self {
        self.resource_group = Some(resource_group.into());
        self
    }

    fn store_settings(&self) -> ScaleResult<StoreSettings> {
        let account = required_str(&self.credentials.storage_account, "credentials.storage_account")?;
        let key = required_str(&self.credentials.storage_key, "credentials.storage_key")?;
        let endpoint = self
            .endpoints
            .table
            .clone()
            .unwrap_or_else(|| format!("https://{}.table.core.windows.net", account));

        Ok(StoreSettings {
            account,
            key,
            endpoint,
            table_name: self.endpoints.table_name.clone(),
        })
    }

    /// Narrow the document into controller settings
    pub fn controller_settings(&self) -> ScaleResult<ControllerSettings> {
        let creds = &self.credentials;
        let tenant = required_str(&creds.tenant, "credentials.tenant")?;
        let client_id = required_str(&creds.client_id, "credentials.client_id")?;
        let client_secret = required_str(&creds.client_secret, "credentials.client_secret")?;
        let subscription_id = required_str(&creds.subscription_id, "credentials.subscription_id")?;
        let resource_group = required_str(&self.resource_group, "resource_group")?;

        let upper_threshold_percent =
            required(&self.upper_threshold_percent, "upper_threshold_percent")?;
        if !(upper_threshold_percent > 0.0 && upper_threshold_percent <= 100.0) {
            return Err(ScaleError::Configuration(format!(
                "upper_threshold_percent must be within (0, 100], got {}",
                upper_threshold_percent
            )));
        }

        let target_node_count = required(&self.target_node_count, "target_node_count")?;
        if target_node_count == 0 {
            return Err(ScaleError::Configuration(
                "target_node_count cannot be 0".to_string(),
            ));
        }

        let auto = &self.autoscale;
        if auto.trigger_count == 0 {
            return Err(ScaleError::Configuration(
                "autoscale.trigger_count must be at least 1".to_string(),
            ));
        }

        Ok(ControllerSettings {
            tenant,
            client_id,
            client_secret,
            subscription_id,
            resource_group,
            upper_threshold_percent,
            target_node_count,
            trigger_count: auto.trigger_count,
            monitor_interval: positive_secs(auto.monitor_interval_secs, "autoscale.monitor_interval_secs")?,
            poll_interval: positive_secs(auto.poll_interval_secs, "autoscale.poll_interval_secs")?,
            cooldown: Duration::from_secs(auto.cooldown_secs),
            call_timeout: positive_secs(auto.call_timeout_secs, "autoscale.call_timeout_secs")?,
            cache_tokens: auto.cache_tokens,
            template: self.template.clone(),
            management_endpoint: self.endpoints.management.clone(),
            authority_endpoint: self.endpoints.authority.clone(),
            store: self.store_settings()?,
        })
    }

    /// Narrow the document into reporter settings
    pub fn reporter_settings(&self) -> ScaleResult<ReporterSettings> {
        let resource_group = required_str(&self.resource_group, "resource_group")?;
        let auto = &self.autoscale;

        Ok(ReporterSettings {
            resource_group,
            publish_interval: positive_secs(auto.publish_interval_secs, "autoscale.publish_interval_secs")?,
            sample_delay: positive_secs(auto.sample_delay_secs, "autoscale.sample_delay_secs")?,
            call_timeout: positive_secs(auto.call_timeout_secs, "autoscale.call_timeout_secs")?,
            store: self.store_settings()?,
        })
    }
}
