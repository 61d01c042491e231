//! Template mutation for one scale-up

use crate::config::TemplateSettings;
use crate::error::{ScaleError, ScaleResult};
use crate::provisioning::DeploymentTemplate;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A deployment document ready for submission
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemplate {
    document: Value,
    next_index: u32,
    target_node_count: u32,
    digest: String,
    placeholder: String,
}

impl ResolvedTemplate {
    /// Wrap an already-resolved document
    ///
    /// Index and target are unknown here and read as zero.
    pub fn from_document(document: Value, placeholder: impl Into<String>) -> Self {
        let digest = digest_of(&document);
        Self {
            document,
            next_index: 0,
            target_node_count: 0,
            digest,
            placeholder: placeholder.into(),
        }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn target_node_count(&self) -> u32 {
        self.target_node_count
    }

    /// Hex SHA-256 of the serialized document
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.document).unwrap_or_default()
    }

    /// Fails when any string or object key still holds the index placeholder
    pub fn validate(&self) -> ScaleResult<()> {
        if contains_placeholder(&self.document, &self.placeholder) {
            return Err(ScaleError::Submission(format!(
                "resolved template still contains placeholder {}",
                self.placeholder
            )));
        }
        Ok(())
    }
}

fn digest_of(document: &Value) -> String {
    let bytes = serde_json::to_vec(document).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

fn contains_placeholder(value: &Value, placeholder: &str) -> bool {
    match value {
        Value::String(s) => s.contains(placeholder),
        Value::Array(items) => items.iter().any(|v| contains_placeholder(v, placeholder)),
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| k.contains(placeholder) || contains_placeholder(v, placeholder)),
        _ => false,
    }
}

fn replace_placeholder(value: &mut Value, placeholder: &str, replacement: &str) {
    match value {
        Value::String(s) => {
            if s.contains(placeholder) {
                *s = s.replace(placeholder, replacement);
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|v| replace_placeholder(v, placeholder, replacement)),
        Value::Object(map) => {
            let entries = std::mem::take(map);
            *map = entries
                .into_iter()
                .map(|(key, mut v)| {
                    replace_placeholder(&mut v, placeholder, replacement);
                    (key.replace(placeholder, replacement), v)
                })
                .collect();
        }
        _ => {}
    }
}

/// Produces resolved deployments from the cached template
#[derive(Debug, Clone)]
pub struct DeploymentMutator {
    capacity_parameter: String,
    placeholder: String,
}

impl DeploymentMutator {
    pub fn new(capacity_parameter: impl Into<String>, placeholder: impl Into<String>) -> Self {
        Self {
            capacity_parameter: capacity_parameter.into(),
            placeholder: placeholder.into(),
        }
    }

    pub fn from_settings(settings: &TemplateSettings) -> Self {
        Self::new(&settings.capacity_parameter, &settings.placeholder)
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Resolve the template for a fleet of `current_resource_count` units
    ///
    /// The capacity parameter is set to `target_node_count` and every index
    /// placeholder becomes `(current_resource_count - 1)`. The input is left
    /// untouched.
    pub fn mutate(
        &self,
        template: &DeploymentTemplate,
        current_resource_count: usize,
        target_node_count: u32,
    ) -> ScaleResult<ResolvedTemplate> {
        if current_resource_count == 0 {
            return Err(ScaleError::Template(
                "no live resources to anchor the next index on".to_string(),
            ));
        }
        let next_index = u32::try_from(current_resource_count - 1).map_err(|_| {
            ScaleError::Template(format!(
                "resource count {} out of range",
                current_resource_count
            ))
        })?;

        let mut working = template.clone();
        working.set_parameter_value(&self.capacity_parameter, Value::from(target_node_count))?;

        let mut document = working.document().clone();
        replace_placeholder(&mut document, &self.placeholder, &format!("({})", next_index));

        let digest = digest_of(&document);
        Ok(ResolvedTemplate {
            document,
            next_index,
            target_node_count,
            digest,
            placeholder: self.placeholder.clone(),
        })
    }
}
