//! Azure Resource Manager REST adapter

use super::{DeploymentTemplateSource, ProvisioningApi, Resource, SubmissionResult, TokenIssuer};
use crate::error::{ScaleError, ScaleResult};
use crate::scaling::ResolvedTemplate;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const ARM_API_VERSION: &str = "2021-04-01";

#[derive(Debug, Deserialize)]
struct ResourcePage {
    #[serde(default)]
    value: Vec<Resource>,
    #[serde(rename = "nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeploymentBody {
    #[serde(default)]
    properties: DeploymentProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentProperties {
    provisioning_state: Option<String>,
    template_link: Option<TemplateLink>,
    #[serde(default)]
    parameters: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct TemplateLink {
    uri: Option<String>,
}

/// Subscription-scoped Resource Manager client
///
/// A token is requested from the issuer before every call.
pub struct ArmClient {
    client: Client,
    endpoint: Url,
    subscription_id: String,
    tokens: Arc<dyn TokenIssuer>,
}

impl ArmClient {
    pub fn new(
        endpoint: &str,
        subscription_id: impl Into<String>,
        tokens: Arc<dyn TokenIssuer>,
        timeout: Duration,
    ) -> ScaleResult<Self> {
        let mut base = endpoint.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base).map_err(|e| {
            ScaleError::Configuration(format!("invalid management endpoint {}: {}", endpoint, e))
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScaleError::Provisioning(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            subscription_id: subscription_id.into(),
            tokens,
        })
    }

    fn deployment_url(&self, resource_group: &str, deployment_name: &str) -> ScaleResult<Url> {
        let path = format!(
            "subscriptions/{}/resourcegroups/{}/providers/Microsoft.Resources/deployments/{}",
            self.subscription_id, resource_group, deployment_name
        );
        self.versioned(&path)
    }

    fn versioned(&self, path: &str) -> ScaleResult<Url> {
        let mut url = self
            .endpoint
            .join(path)
            .map_err(|e| ScaleError::Provisioning(format!("invalid resource path {}: {}", path, e)))?;
        url.query_pairs_mut().append_pair("api-version", ARM_API_VERSION);
        Ok(url)
    }

    async fn authorized(&self, method: Method, url: Url) -> ScaleResult<RequestBuilder> {
        let token = self.tokens.acquire_token().await?;
        Ok(self.client.request(method, url).bearer_auth(token.value))
    }

    async fn read_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
    ) -> ScaleResult<DeploymentProperties> {
        let url = self.deployment_url(resource_group, deployment_name)?;
        let response = self
            .authorized(Method::GET, url)
            .await?
            .send()
            .await
            .map_err(|e| ScaleError::Provisioning(format!("get deployment request failed: {}", e)))?;

        let response = ensure_success(response, || format!("get deployment {}", deployment_name)).await?;
        let body: DeploymentBody = response.json().await.map_err(|e| {
            ScaleError::Provisioning(format!("malformed deployment {}: {}", deployment_name, e))
        })?;
        Ok(body.properties)
    }
}

async fn ensure_success(
    response: Response,
    context: impl FnOnce() -> String,
) -> ScaleResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ScaleError::Provisioning(format!(
        "{} returned {}: {}",
        context(),
        status,
        body
    )))
}

#[async_trait]
impl ProvisioningApi for ArmClient {
    async fn list_resources(
        &self,
        resource_group: &str,
        resource_type: &str,
    ) -> ScaleResult<Vec<Resource>> {
        let mut url = self.versioned(&format!(
            "subscriptions/{}/resourceGroups/{}/resources",
            self.subscription_id, resource_group
        ))?;
        url.query_pairs_mut()
            .append_pair("$filter", &format!("resourceType eq '{}'", resource_type));

        let mut resources = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let response = self
                .authorized(Method::GET, url)
                .await?
                .send()
                .await
                .map_err(|e| ScaleError::Provisioning(format!("list resources request failed: {}", e)))?;

            let response = ensure_success(response, || {
                format!("list resources in {}", resource_group)
            })
            .await?;
            let page: ResourcePage = response
                .json()
                .await
                .map_err(|e| ScaleError::Provisioning(format!("malformed resource list: {}", e)))?;

            resources.extend(page.value);
            if let Some(link) = page.next_link {
                next = Some(Url::parse(&link).map_err(|e| {
                    ScaleError::Provisioning(format!("invalid nextLink {}: {}", link, e))
                })?);
            }
        }

        debug!(
            resource_group = %resource_group,
            resource_type = %resource_type,
            count = resources.len(),
            "Listed resources"
        );
        Ok(resources)
    }

    async fn submit_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
        template: &ResolvedTemplate,
    ) -> ScaleResult<SubmissionResult> {
        let url = self.deployment_url(resource_group, deployment_name)?;
        let response = self
            .authorized(Method::PUT, url)
            .await?
            .json(template.document())
            .send()
            .await
            .map_err(|e| ScaleError::Submission(format!("deployment request failed: {}", e)))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(ScaleError::Submission(format!(
                "deployment {} returned {}: {}",
                deployment_name, status, body
            )));
        }

        let provisioning_state = response
            .json::<DeploymentBody>()
            .await
            .ok()
            .and_then(|b| b.properties.provisioning_state);

        Ok(SubmissionResult {
            deployment_name: deployment_name.to_string(),
            status: status.as_u16(),
            provisioning_state,
        })
    }

    async fn get_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
    ) -> ScaleResult<String> {
        self.read_deployment(resource_group, deployment_name)
            .await?
            .provisioning_state
            .ok_or_else(|| {
                ScaleError::Provisioning(format!(
                    "deployment {} has no provisioning state",
                    deployment_name
                ))
            })
    }

    async fn get_existing_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
    ) -> ScaleResult<DeploymentTemplateSource> {
        let properties = self.read_deployment(resource_group, deployment_name).await?;
        Ok(DeploymentTemplateSource {
            provisioning_state: properties.provisioning_state.unwrap_or_default(),
            template_uri: properties.template_link.and_then(|l| l.uri),
            parameters: properties.parameters,
        })
    }

    async fn download_template(&self, uri: &str) -> ScaleResult<String> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| ScaleError::Provisioning(format!("template download failed: {}", e)))?;

        let response = ensure_success(response, || format!("download of {}", uri)).await?;
        response
            .text()
            .await
            .map_err(|e| ScaleError::Provisioning(format!("template download failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::AccessToken;
    use chrono::Utc;
    use mockito::Matcher;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out a fixed token and counts how often it was asked
    #[derive(Default)]
    struct CountingIssuer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenIssuer for CountingIssuer {
        async fn acquire_token(&self) -> ScaleResult<AccessToken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::new("test-token", Utc::now() + chrono::Duration::hours(1)))
        }
    }

    fn counted_client(url: &str) -> (ArmClient, Arc<CountingIssuer>) {
        let issuer = Arc::new(CountingIssuer::default());
        let client = ArmClient::new(url, "sub-1", issuer.clone(), Duration::from_secs(5)).unwrap();
        (client, issuer)
    }

    fn client(url: &str) -> ArmClient {
        counted_client(url).0
    }

    const DEPLOYMENT_PATH: &str =
        "/subscriptions/sub-1/resourcegroups/rg-prod/providers/Microsoft.Resources/deployments/Deployment-1";

    #[tokio::test]
    async fn test_list_resources_follows_next_link() {
        let mut server = mockito::Server::new_async().await;
        let next_link = format!(
            "{}/subscriptions/sub-1/resourceGroups/rg-prod/resources?api-version={}&page=2",
            server.url(),
            ARM_API_VERSION
        );
        let first = server
            .mock("GET", "/subscriptions/sub-1/resourceGroups/rg-prod/resources")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api-version".into(), ARM_API_VERSION.into()),
                Matcher::UrlEncoded(
                    "$filter".into(),
                    "resourceType eq 'Microsoft.Compute/virtualMachines/extensions'".into(),
                ),
            ]))
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(
                json!({
                    "value": [
                        {"id": "/x/ext0", "name": "ext0", "type": "Microsoft.Compute/virtualMachines/extensions"},
                        {"id": "/x/ext1", "name": "ext1", "type": "Microsoft.Compute/virtualMachines/extensions"}
                    ],
                    "nextLink": next_link
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/subscriptions/sub-1/resourceGroups/rg-prod/resources")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(
                json!({
                    "value": [
                        {"id": "/x/ext2", "name": "ext2", "type": "Microsoft.Compute/virtualMachines/extensions"}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let (client, issuer) = counted_client(&server.url());
        let resources = client
            .list_resources("rg-prod", "Microsoft.Compute/virtualMachines/extensions")
            .await
            .unwrap();

        let names: Vec<&str> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["ext0", "ext1", "ext2"]);
        // one token per page
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_deployment_puts_document() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", DEPLOYMENT_PATH)
            .match_query(Matcher::UrlEncoded("api-version".into(), ARM_API_VERSION.into()))
            .match_body(Matcher::PartialJson(json!({
                "properties": {"mode": "Incremental", "parameters": {"slaveCount": {"value": 5}}}
            })))
            .with_status(201)
            .with_body(r#"{"properties":{"provisioningState":"Accepted"}}"#)
            .create_async()
            .await;

        let resolved = ResolvedTemplate::from_document(
            json!({
                "properties": {
                    "mode": "Incremental",
                    "parameters": {"slaveCount": {"value": 5}},
                    "template": {"resources": []}
                }
            }),
            "(INDEX)",
        );

        let result = client(&server.url())
            .submit_deployment("rg-prod", "Deployment-1", &resolved)
            .await
            .unwrap();

        assert_eq!(result.status, 201);
        assert_eq!(result.provisioning_state.as_deref(), Some("Accepted"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_rejection_is_submission_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", DEPLOYMENT_PATH)
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"code":"InvalidTemplate"}}"#)
            .create_async()
            .await;

        let resolved = ResolvedTemplate::from_document(json!({"properties": {}}), "(INDEX)");
        let err = client(&server.url())
            .submit_deployment("rg-prod", "Deployment-1", &resolved)
            .await
            .unwrap_err();

        assert!(matches!(err, ScaleError::Submission(_)));
        assert!(err.to_string().contains("InvalidTemplate"));
    }

    #[tokio::test]
    async fn test_get_deployment_state() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", DEPLOYMENT_PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"name":"Deployment-1","properties":{"provisioningState":"Running"}}"#)
            .create_async()
            .await;

        let state = client(&server.url())
            .get_deployment("rg-prod", "Deployment-1")
            .await
            .unwrap();
        assert_eq!(state, "Running");
    }

    #[tokio::test]
    async fn test_token_acquired_for_every_request() {
        let mut server = mockito::Server::new_async().await;
        let put = server
            .mock("PUT", DEPLOYMENT_PATH)
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer test-token")
            .with_status(201)
            .with_body(r#"{"properties":{"provisioningState":"Accepted"}}"#)
            .expect(1)
            .create_async()
            .await;
        let get = server
            .mock("GET", DEPLOYMENT_PATH)
            .match_query(Matcher::Any)
            .match_header("authorization", "Bearer test-token")
            .with_status(200)
            .with_body(r#"{"properties":{"provisioningState":"Running"}}"#)
            .expect(3)
            .create_async()
            .await;

        let (client, issuer) = counted_client(&server.url());
        let resolved = ResolvedTemplate::from_document(
            json!({"properties": {"parameters": {"slaveCount": {"value": 4}}}}),
            "(INDEX)",
        );
        client
            .submit_deployment("rg-prod", "Deployment-1", &resolved)
            .await
            .unwrap();
        for _ in 0..3 {
            let state = client.get_deployment("rg-prod", "Deployment-1").await.unwrap();
            assert_eq!(state, "Running");
        }

        assert_eq!(issuer.calls.load(Ordering::SeqCst), 4);
        put.assert_async().await;
        get.assert_async().await;
    }

    #[tokio::test]
    async fn test_failed_request_still_costs_one_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", DEPLOYMENT_PATH)
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let (client, issuer) = counted_client(&server.url());
        assert!(client.get_deployment("rg-prod", "Deployment-1").await.is_err());
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_missing_deployment_is_provisioning_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", DEPLOYMENT_PATH)
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("DeploymentNotFound")
            .create_async()
            .await;

        let err = client(&server.url())
            .get_deployment("rg-prod", "Deployment-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ScaleError::Provisioning(_)));
    }

    #[tokio::test]
    async fn test_get_existing_deployment() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/subscriptions/sub-1/resourcegroups/rg-prod/providers/Microsoft.Resources/deployments/SwarmSlaveNodes",
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "properties": {
                        "provisioningState": "Succeeded",
                        "templateLink": {"uri": "https://templates.example/slaves.json"},
                        "parameters": {"slaveCount": {"type": "Int", "value": 3}}
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let source = client(&server.url())
            .get_existing_deployment("rg-prod", "SwarmSlaveNodes")
            .await
            .unwrap();

        assert_eq!(source.provisioning_state, "Succeeded");
        assert_eq!(
            source.template_uri.as_deref(),
            Some("https://templates.example/slaves.json")
        );
        assert_eq!(source.parameters["slaveCount"]["value"], 3);
    }

    #[tokio::test]
    async fn test_download_template() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/slaves.json")
            .with_status(200)
            .with_body(r#"{"resources":[]}"#)
            .create_async()
            .await;

        let (client, issuer) = counted_client(&server.url());
        let body = client
            .download_template(&format!("{}/slaves.json", server.url()))
            .await
            .unwrap();
        assert_eq!(body, r#"{"resources":[]}"#);
        // downloads go out without a bearer token
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
    }
}
