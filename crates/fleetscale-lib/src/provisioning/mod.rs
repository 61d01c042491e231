//! Cloud provisioning collaborators
//!
//! The controller talks to the provisioning service through
//! [`ProvisioningApi`] and authenticates through [`TokenIssuer`]. The
//! production adapters speak the Azure Resource Manager REST dialect.

mod arm;
mod template;
mod token;

pub use arm::{ArmClient, ARM_API_VERSION};
pub use template::{inject_index_placeholder, DeploymentTemplate, TemplateCache};
pub use token::{AccessToken, CachingTokenIssuer, ClientCredentialsIssuer};

use crate::error::ScaleResult;
use crate::scaling::ResolvedTemplate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A live resource counted toward the fleet size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
}

/// Result of an accepted deployment submission
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionResult {
    pub deployment_name: String,
    /// HTTP status the provisioning service answered with
    pub status: u16,
    /// Provisioning state echoed back at submission, if any
    pub provisioning_state: Option<String>,
}

/// An existing deployment used to seed the template cache
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentTemplateSource {
    pub provisioning_state: String,
    pub template_uri: Option<String>,
    pub parameters: Map<String, Value>,
}

/// Resource-provisioning operations needed by the controller
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    /// Live resources of `resource_type` in the resource group
    async fn list_resources(
        &self,
        resource_group: &str,
        resource_type: &str,
    ) -> ScaleResult<Vec<Resource>>;

    /// Submit a resolved template as a new deployment
    async fn submit_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
        template: &ResolvedTemplate,
    ) -> ScaleResult<SubmissionResult>;

    /// Raw provisioning state of a deployment
    async fn get_deployment(&self, resource_group: &str, deployment_name: &str)
        -> ScaleResult<String>;

    /// Parameters and template link of an existing deployment
    async fn get_existing_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
    ) -> ScaleResult<DeploymentTemplateSource>;

    /// Download a linked template document as text
    async fn download_template(&self, uri: &str) -> ScaleResult<String>;
}

/// Source of bearer tokens for the provisioning API
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn acquire_token(&self) -> ScaleResult<AccessToken>;
}
