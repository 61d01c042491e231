//! Error taxonomy for the autoscaler
//!
//! Every fallible operation in the library returns [`ScaleResult`]. The
//! variants map one-to-one onto the failure classes the controller and
//! reporter loops react to; none of them is retried automatically.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by reporters, the controller and their collaborators
#[derive(Debug, Error)]
pub enum ScaleError {
    /// A required configuration field is missing or invalid
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The cached deployment template is missing or malformed
    #[error("template error: {0}")]
    Template(String),

    /// The provisioning API rejected a deployment, or the resolved
    /// template failed pre-submission validation
    #[error("deployment submission rejected: {0}")]
    Submission(String),

    /// A tracked deployment reached the terminal `Failed` state
    #[error("deployment {deployment_name} failed")]
    DeploymentFailed { deployment_name: String },

    /// The provisioning API reported a state outside the known set
    #[error("deployment {deployment_name} reported unexpected provisioning state '{state}'")]
    UnexpectedState {
        deployment_name: String,
        state: String,
    },

    /// A metric store read or write failed
    #[error("metric store error: {0}")]
    Store(String),

    /// The metric store holds no samples for the fleet
    #[error("no usage samples recorded for fleet {fleet_id}")]
    NoSamples { fleet_id: String },

    /// CPU counters were unreadable or produced an out-of-range value
    #[error("sampling fault: {0}")]
    SamplingFault(String),

    /// A provisioning API read (list, get, download) failed
    #[error("provisioning API error: {0}")]
    Provisioning(String),

    /// Token acquisition failed
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A collaborator call did not complete within its deadline
    #[error("{operation} timed out after {}s", timeout.as_secs())]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl ScaleError {
    /// Short machine-readable label used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ScaleError::Configuration(_) => "configuration",
            ScaleError::Template(_) => "template",
            ScaleError::Submission(_) => "submission",
            ScaleError::DeploymentFailed { .. } => "deployment_failed",
            ScaleError::UnexpectedState { .. } => "unexpected_state",
            ScaleError::Store(_) => "store",
            ScaleError::NoSamples { .. } => "no_samples",
            ScaleError::SamplingFault(_) => "sampling_fault",
            ScaleError::Provisioning(_) => "provisioning",
            ScaleError::Authentication(_) => "authentication",
            ScaleError::Timeout { .. } => "timeout",
        }
    }
}

/// Result alias used throughout the library
pub type ScaleResult<T> = Result<T, ScaleError>;

/// Run a collaborator call under a deadline
pub async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, call: F) -> ScaleResult<T>
where
    F: std::future::Future<Output = ScaleResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ScaleError::Timeout { operation, timeout }),
    }
}
