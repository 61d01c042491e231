//! Deployment template cache
//!
//! The template is derived once from a seed deployment, persisted as
//! pretty JSON, and read back from disk for every scale-up.

use super::ProvisioningApi;
use crate::config::TemplateSettings;
use crate::error::{with_timeout, ScaleError, ScaleResult};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::info;

const SEED_SUCCEEDED: &str = "Succeeded";

/// A cached deployment document
///
/// Shape: `{"properties": {"mode", "parameters": {..}, "template": {..}}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentTemplate {
    document: Value,
}

impl DeploymentTemplate {
    /// Wrap a document after checking its shape
    pub fn from_value(document: Value) -> ScaleResult<Self> {
        let properties = document
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| ScaleError::Template("missing properties object".to_string()))?;

        if !properties.get("template").map_or(false, Value::is_object) {
            return Err(ScaleError::Template(
                "missing properties.template object".to_string(),
            ));
        }
        if !properties.get("parameters").map_or(false, Value::is_object) {
            return Err(ScaleError::Template(
                "missing properties.parameters object".to_string(),
            ));
        }

        Ok(Self { document })
    }

    pub fn parse(content: &str) -> ScaleResult<Self> {
        let document: Value = serde_json::from_str(content)
            .map_err(|e| ScaleError::Template(format!("template is not valid JSON: {}", e)))?;
        Self::from_value(document)
    }

    /// Assemble a template from seed parameters and a template body
    pub fn assemble(parameters: Map<String, Value>, template: Value) -> ScaleResult<Self> {
        Self::from_value(json!({
            "properties": {
                "mode": "Incremental",
                "parameters": parameters,
                "template": template,
            }
        }))
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Parameter object by name, e.g. `slaveCount`
    pub fn parameter(&self, name: &str) -> Option<&Map<String, Value>> {
        self.document
            .pointer(&format!("/properties/parameters/{}", name))
            .and_then(Value::as_object)
    }

    /// Set `properties.parameters.<name>.value`
    pub fn set_parameter_value(&mut self, name: &str, value: Value) -> ScaleResult<()> {
        let parameter = self
            .document
            .pointer_mut(&format!("/properties/parameters/{}", name))
            .and_then(Value::as_object_mut)
            .ok_or_else(|| {
                ScaleError::Template(format!("missing properties.parameters.{} object", name))
            })?;
        parameter.insert("value".to_string(), value);
        Ok(())
    }

    pub fn to_pretty_json(&self) -> ScaleResult<String> {
        serde_json::to_string_pretty(&self.document)
            .map_err(|e| ScaleError::Template(format!("failed to serialize template: {}", e)))
    }
}

/// Rewrite every `copyIndex()` (any case) to `copyIndex<placeholder>`
pub fn inject_index_placeholder(raw: &str, placeholder: &str) -> String {
    const NEEDLE: &str = "copyindex()";
    let lowered = raw.to_ascii_lowercase();
    let mut out = String::with_capacity(raw.len());
    let mut last = 0;

    for (start, _) in lowered.match_indices(NEEDLE) {
        out.push_str(&raw[last..start]);
        // Keep the author's casing of the function name
        out.push_str(&raw[start..start + NEEDLE.len() - 2]);
        out.push_str(placeholder);
        last = start + NEEDLE.len();
    }
    out.push_str(&raw[last..]);
    out
}

/// Fetch-if-absent cache of the deployment template
pub struct TemplateCache {
    api: Arc<dyn ProvisioningApi>,
    settings: TemplateSettings,
    resource_group: String,
    target_node_count: u32,
    call_timeout: Duration,
}

impl TemplateCache {
    pub fn new(
        api: Arc<dyn ProvisioningApi>,
        settings: TemplateSettings,
        resource_group: impl Into<String>,
        target_node_count: u32,
        call_timeout: Duration,
    ) -> Self {
        Self {
            api,
            settings,
            resource_group: resource_group.into(),
            target_node_count,
            call_timeout,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.settings.cache_path()
    }

    /// Load the cached template, building it from the seed deployment first
    /// when no cache file exists
    pub async fn ensure(&self) -> ScaleResult<DeploymentTemplate> {
        let path = self.path();
        let exists = fs::try_exists(&path).await.map_err(|e| {
            ScaleError::Template(format!("cannot access {}: {}", path.display(), e))
        })?;

        if exists {
            return self.load().await;
        }

        let template = self.build_from_seed().await?;
        self.store(&template).await?;
        info!(
            path = %path.display(),
            seed = %self.settings.seed_deployment,
            "Cached deployment template"
        );
        Ok(template)
    }

    /// Read the template from local storage
    pub async fn load(&self) -> ScaleResult<DeploymentTemplate> {
        let path = self.path();
        let content = fs::read_to_string(&path).await.map_err(|e| {
            ScaleError::Template(format!("cannot read {}: {}", path.display(), e))
        })?;

        let template = DeploymentTemplate::parse(&content)?;
        if template.parameter(&self.settings.capacity_parameter).is_none() {
            return Err(ScaleError::Template(format!(
                "missing properties.parameters.{} object",
                self.settings.capacity_parameter
            )));
        }
        Ok(template)
    }

    /// Write the template as pretty JSON, creating the directory
    pub async fn store(&self, template: &DeploymentTemplate) -> ScaleResult<()> {
        let path = self.path();
        if let Some(dir) = path.parent() {
            create_dir(dir).await?;
        }
        fs::write(&path, template.to_pretty_json()?)
            .await
            .map_err(|e| ScaleError::Template(format!("cannot write {}: {}", path.display(), e)))
    }

    async fn build_from_seed(&self) -> ScaleResult<DeploymentTemplate> {
        let seed_name = &self.settings.seed_deployment;
        let seed = with_timeout(
            "get_existing_deployment",
            self.call_timeout,
            self.api.get_existing_deployment(&self.resource_group, seed_name),
        )
        .await?;

        if seed.provisioning_state != SEED_SUCCEEDED {
            return Err(ScaleError::Template(format!(
                "seed deployment {} is in state '{}', expected {}",
                seed_name, seed.provisioning_state, SEED_SUCCEEDED
            )));
        }
        let uri = seed.template_uri.ok_or_else(|| {
            ScaleError::Template(format!("seed deployment {} has no template link", seed_name))
        })?;

        let mut parameters = seed.parameters;
        for parameter in parameters.values_mut() {
            if let Some(object) = parameter.as_object_mut() {
                object.remove("type");
            }
        }

        let raw = with_timeout(
            "download_template",
            self.call_timeout,
            self.api.download_template(&uri),
        )
        .await?;
        let body: Value = serde_json::from_str(&inject_index_placeholder(
            &raw,
            &self.settings.placeholder,
        ))
        .map_err(|e| ScaleError::Template(format!("linked template {} is not JSON: {}", uri, e)))?;

        let mut template = DeploymentTemplate::assemble(parameters, body)?;
        template.set_parameter_value(
            &self.settings.capacity_parameter,
            Value::from(self.target_node_count),
        )?;
        Ok(template)
    }
}

async fn create_dir(dir: &Path) -> ScaleResult<()> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .await
        .map_err(|e| ScaleError::Template(format!("cannot create {}: {}", dir.display(), e)))
}
