//! HTTP implementation of the item service.
//!
//! Talks to the platform REST API for item operations and to the BI API for
//! connection binding and model refresh. Long-running operations answered
//! with `202 Accepted` are polled until they finish.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{LOCATION, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use itemsync_core::error::{Error, Result};
use itemsync_core::item::{DefinitionPart, ItemKind, WorkspaceItem};
use itemsync_core::service::{ConnectionSpec, ItemService, StorageEndpoint};

use crate::{Config, ServicePrincipal};

/// Poll interval used when the service sends no `Retry-After` header.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Gateway identifier the BI API expects for cloud connections.
const CLOUD_GATEWAY_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Item service backed by the platform REST API.
pub struct RestItemService {
    client: Client,
    base_url: String,
    bi_base_url: String,
    token: Option<String>,
    service_principal: Option<ServicePrincipal>,
    poll_interval: Duration,
}

impl RestItemService {
    /// Creates a new service client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_url.clone(),
            bi_base_url: config.bi_api_url.clone(),
            token: config.api_token.clone(),
            service_principal: config.service_principal.clone(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Sets the fallback poll interval for long-running operations.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    // ========================================================================
    // Workspaces
    // ========================================================================

    /// Lists the workspaces visible to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        self.get_paged("list_workspaces", &format!("{}/workspaces", self.base_url))
            .await
    }

    /// Finds a workspace by display name.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspaces cannot be listed.
    pub async fn find_workspace_by_name(&self, display_name: &str) -> Result<Option<Workspace>> {
        Ok(self
            .list_workspaces()
            .await?
            .into_iter()
            .find(|w| w.display_name == display_name))
    }

    /// Finds a workspace by identifier or display name.
    ///
    /// # Errors
    ///
    /// Returns an error if the workspaces cannot be listed.
    pub async fn resolve_workspace(&self, name_or_id: &str) -> Result<Option<Workspace>> {
        Ok(self
            .list_workspaces()
            .await?
            .into_iter()
            .find(|w| w.id.eq_ignore_ascii_case(name_or_id) || w.display_name == name_or_id))
    }

    /// Creates a workspace, optionally assigned to a capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response cannot be parsed.
    pub async fn create_workspace(
        &self,
        display_name: &str,
        capacity_id: Option<&str>,
    ) -> Result<Workspace> {
        let url = format!("{}/workspaces", self.base_url);
        let request = CreateWorkspaceRequest {
            display_name,
            capacity_id,
        };
        let response = self
            .send("create_workspace", display_name, self.client.post(&url).json(&request))
            .await?;
        read_json("create_workspace", display_name, response).await
    }

    // ========================================================================
    // Transport
    // ========================================================================

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Sends a request and maps transport errors and non-success statuses.
    async fn send(
        &self,
        operation: &'static str,
        target: &str,
        req: RequestBuilder,
    ) -> Result<Response> {
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| Error::remote_with_source(operation, target, e))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Error::remote(operation, target, format!("API error ({status}): {body}")))
        }
    }

    async fn get_paged<T: DeserializeOwned>(&self, operation: &'static str, url: &str) -> Result<Vec<T>> {
        let mut values = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self.client.get(url);
            if let Some(token) = &token {
                req = req.query(&[("continuationToken", token)]);
            }
            let page: Page<T> = read_json(operation, url, self.send(operation, url, req).await?).await?;
            values.extend(page.value);
            match page.continuation_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => return Ok(values),
            }
        }
    }

    fn retry_after(&self, response: &Response) -> Duration {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(self.poll_interval, Duration::from_secs)
    }

    /// Waits for a long-running operation to finish.
    ///
    /// Returns the final response body: the immediate body for a synchronous
    /// answer, or the operation result when `want_result` is set.
    async fn complete(
        &self,
        operation: &'static str,
        target: &str,
        response: Response,
        want_result: bool,
    ) -> Result<Option<Response>> {
        if response.status() != StatusCode::ACCEPTED {
            return Ok(Some(response));
        }
        let Some(location) = header_string(&response, LOCATION) else {
            return Ok(None);
        };

        let mut delay = self.retry_after(&response);
        loop {
            tokio::time::sleep(delay).await;
            let poll = self
                .send(operation, target, self.client.get(&location))
                .await?;
            delay = self.retry_after(&poll);
            let state: OperationState = read_json(operation, target, poll).await?;
            tracing::debug!(operation, resource = %target, status = %state.status, "polled operation");

            match state.status.as_str() {
                "Succeeded" => break,
                "Failed" | "Cancelled" => {
                    return Err(Error::remote(
                        operation,
                        target,
                        state.error_message().unwrap_or_else(|| format!("operation {}", state.status)),
                    ));
                }
                _ => {}
            }
        }

        if !want_result {
            return Ok(None);
        }
        let url = format!("{}/result", location.trim_end_matches('/'));
        self.send(operation, target, self.client.get(&url))
            .await
            .map(Some)
    }

    async fn lakehouse_properties(&self, workspace_id: &str, item_id: &str) -> Result<LakehouseProperties> {
        let target = format!("workspace {workspace_id} lakehouse {item_id}");
        let url = format!("{}/workspaces/{workspace_id}/lakehouses/{item_id}", self.base_url);
        let response = self
            .send("resolve_storage_endpoint", &target, self.client.get(&url))
            .await?;
        let lakehouse: Lakehouse = read_json("resolve_storage_endpoint", &target, response).await?;
        Ok(lakehouse.properties)
    }
}

fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn read_json<T: DeserializeOwned>(
    operation: &'static str,
    target: &str,
    response: Response,
) -> Result<T> {
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::remote_with_source(operation, target, e))?;
    serde_json::from_slice(&body).map_err(|e| {
        Error::remote(operation, target, format!("Failed to parse response: {e}"))
    })
}

#[async_trait]
impl ItemService for RestItemService {
    async fn list_items(&self, workspace_id: &str) -> Result<Vec<WorkspaceItem>> {
        let url = format!("{}/workspaces/{workspace_id}/items", self.base_url);
        self.get_paged("list_items", &url).await
    }

    async fn create_item(
        &self,
        workspace_id: &str,
        display_name: &str,
        kind: &ItemKind,
        definition: Option<&[DefinitionPart]>,
    ) -> Result<WorkspaceItem> {
        let target = format!("workspace {workspace_id} item {display_name}.{kind}");
        let url = format!("{}/workspaces/{workspace_id}/items", self.base_url);
        let request = CreateItemRequest {
            display_name,
            kind: kind.as_str(),
            definition: definition.map(|parts| DefinitionBody { parts }),
        };

        let response = self
            .send("create_item", &target, self.client.post(&url).json(&request))
            .await?;
        match self.complete("create_item", &target, response, true).await? {
            Some(response) => read_json("create_item", &target, response).await,
            None => Err(Error::remote("create_item", &target, "operation returned no item")),
        }
    }

    async fn update_item_definition(
        &self,
        workspace_id: &str,
        item_id: &str,
        definition: &[DefinitionPart],
    ) -> Result<()> {
        let target = format!("workspace {workspace_id} item {item_id}");
        let url = format!(
            "{}/workspaces/{workspace_id}/items/{item_id}/updateDefinition",
            self.base_url
        );
        let request = UpdateDefinitionRequest {
            definition: DefinitionBody { parts: definition },
        };
        let response = self
            .send("update_item_definition", &target, self.client.post(&url).json(&request))
            .await?;
        self.complete("update_item_definition", &target, response, false)
            .await
            .map(|_| ())
    }

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> Result<()> {
        let target = format!("workspace {workspace_id} item {item_id}");
        let url = format!("{}/workspaces/{workspace_id}/items/{item_id}", self.base_url);
        self.send("delete_item", &target, self.client.delete(&url))
            .await
            .map(|_| ())
    }

    async fn get_item_definition(
        &self,
        workspace_id: &str,
        item_id: &str,
        format_hint: Option<&str>,
    ) -> Result<Vec<DefinitionPart>> {
        let target = format!("workspace {workspace_id} item {item_id}");
        let url = format!(
            "{}/workspaces/{workspace_id}/items/{item_id}/getDefinition",
            self.base_url
        );
        let mut req = self.client.post(&url);
        if let Some(format) = format_hint {
            req = req.query(&[("format", format)]);
        }

        let response = self.send("get_item_definition", &target, req).await?;
        match self.complete("get_item_definition", &target, response, true).await? {
            Some(response) => {
                let body: GetDefinitionResponse =
                    read_json("get_item_definition", &target, response).await?;
                Ok(body.definition.parts)
            }
            None => Err(Error::remote(
                "get_item_definition",
                &target,
                "operation returned no definition",
            )),
        }
    }

    async fn run_item(&self, workspace_id: &str, item_id: &str) -> Result<()> {
        let target = format!("workspace {workspace_id} item {item_id}");
        let url = format!(
            "{}/workspaces/{workspace_id}/items/{item_id}/jobs/instances",
            self.base_url
        );
        let response = self
            .send(
                "run_item",
                &target,
                self.client.post(&url).query(&[("jobType", "RunNotebook")]),
            )
            .await?;

        let Some(location) = header_string(&response, LOCATION) else {
            return Err(Error::remote("run_item", &target, "job instance location missing"));
        };

        let mut delay = self.retry_after(&response);
        loop {
            tokio::time::sleep(delay).await;
            let poll = self.send("run_item", &target, self.client.get(&location)).await?;
            delay = self.retry_after(&poll);
            let job: JobInstance = read_json("run_item", &target, poll).await?;
            tracing::debug!(resource = %target, status = %job.status, "polled job instance");

            match job.status.as_str() {
                "Completed" => return Ok(()),
                "Failed" | "Cancelled" | "Deduped" => {
                    let reason = job
                        .failure_reason
                        .and_then(|r| r.message)
                        .unwrap_or_else(|| format!("job {}", job.status));
                    return Err(Error::remote("run_item", &target, reason));
                }
                _ => {}
            }
        }
    }

    async fn resolve_storage_endpoint(
        &self,
        workspace_id: &str,
        storage_item_id: &str,
    ) -> Result<StorageEndpoint> {
        let target = format!("workspace {workspace_id} lakehouse {storage_item_id}");
        loop {
            let properties = self.lakehouse_properties(workspace_id, storage_item_id).await?;
            match properties.sql_endpoint_properties {
                Some(sql) if sql.provisioning_status == "Success" => {
                    return Ok(StorageEndpoint {
                        endpoint_id: sql.id.unwrap_or_default(),
                        connection_string: sql.connection_string.unwrap_or_default(),
                    });
                }
                Some(sql) if sql.provisioning_status == "Failed" => {
                    return Err(Error::remote(
                        "resolve_storage_endpoint",
                        &target,
                        "endpoint provisioning failed",
                    ));
                }
                _ => {
                    tracing::debug!(resource = %target, "waiting for endpoint provisioning");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<String> {
        let target = format!("connection {}", spec.display_name);
        let Some(sp) = &self.service_principal else {
            return Err(Error::InvalidInput(
                "service principal credentials are required to create connections".into(),
            ));
        };

        let url = format!("{}/connections", self.base_url);
        let request = CreateConnectionRequest::sql(spec, sp);
        let response = self
            .send("create_connection", &target, self.client.post(&url).json(&request))
            .await?;
        let created: CreatedConnection = read_json("create_connection", &target, response).await?;
        Ok(created.id)
    }

    async fn bind_item_to_connection(
        &self,
        workspace_id: &str,
        item_id: &str,
        connection_id: &str,
    ) -> Result<()> {
        let target = format!("workspace {workspace_id} item {item_id} connection {connection_id}");
        let url = format!(
            "{}/groups/{workspace_id}/datasets/{item_id}/Default.BindToGateway",
            self.bi_base_url
        );
        let request = BindToGatewayRequest {
            gateway_object_id: CLOUD_GATEWAY_ID,
            datasource_object_ids: [connection_id],
        };
        self.send("bind_item_to_connection", &target, self.client.post(&url).json(&request))
            .await
            .map(|_| ())
    }

    async fn refresh_item(&self, workspace_id: &str, item_id: &str) -> Result<()> {
        let target = format!("workspace {workspace_id} item {item_id}");
        let url = format!(
            "{}/groups/{workspace_id}/datasets/{item_id}/refreshes",
            self.bi_base_url
        );
        let body = serde_json::json!({ "notifyOption": "NoNotification" });
        self.send("refresh_item", &target, self.client.post(&url).json(&body))
            .await
            .map(|_| ())
    }
}

// ============================================================================
// API Types
// ============================================================================

/// A workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Workspace ID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Workspace type.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Assigned capacity.
    #[serde(default)]
    pub capacity_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page<T> {
    value: Vec<T>,
    #[serde(default)]
    continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateWorkspaceRequest<'a> {
    display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    capacity_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateItemRequest<'a> {
    display_name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    definition: Option<DefinitionBody<'a>>,
}

#[derive(Debug, Serialize)]
struct DefinitionBody<'a> {
    parts: &'a [DefinitionPart],
}

#[derive(Debug, Serialize)]
struct UpdateDefinitionRequest<'a> {
    definition: DefinitionBody<'a>,
}

#[derive(Debug, Deserialize)]
struct GetDefinitionResponse {
    definition: OwnedDefinition,
}

#[derive(Debug, Deserialize)]
struct OwnedDefinition {
    parts: Vec<DefinitionPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationState {
    status: String,
    #[serde(default)]
    error: Option<ErrorDetail>,
}

impl OperationState {
    fn error_message(&self) -> Option<String> {
        self.error.as_ref().and_then(|e| e.message.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobInstance {
    status: String,
    #[serde(default)]
    failure_reason: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct Lakehouse {
    properties: LakehouseProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LakehouseProperties {
    #[serde(default)]
    sql_endpoint_properties: Option<SqlEndpointProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlEndpointProperties {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    connection_string: Option<String>,
    #[serde(default)]
    provisioning_status: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateConnectionRequest<'a> {
    connectivity_type: &'static str,
    display_name: &'a str,
    connection_details: ConnectionDetails<'a>,
    privacy_level: &'static str,
    credential_details: CredentialDetails<'a>,
}

impl<'a> CreateConnectionRequest<'a> {
    fn sql(spec: &'a ConnectionSpec, sp: &'a ServicePrincipal) -> Self {
        Self {
            connectivity_type: "ShareableCloud",
            display_name: &spec.display_name,
            connection_details: ConnectionDetails {
                kind: "SQL",
                creation_method: "SQL",
                parameters: [
                    ConnectionParameter::text("server", &spec.server),
                    ConnectionParameter::text("database", &spec.database),
                ],
            },
            privacy_level: "Organizational",
            credential_details: CredentialDetails {
                single_sign_on_type: "None",
                connection_encryption: "NotEncrypted",
                skip_test_connection: false,
                credentials: Credentials {
                    credential_type: "ServicePrincipal",
                    service_principal_client_id: &sp.client_id,
                    service_principal_secret: &sp.client_secret,
                    tenant_id: &sp.tenant_id,
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionDetails<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    creation_method: &'static str,
    parameters: [ConnectionParameter<'a>; 2],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionParameter<'a> {
    data_type: &'static str,
    name: &'static str,
    value: &'a str,
}

impl<'a> ConnectionParameter<'a> {
    fn text(name: &'static str, value: &'a str) -> Self {
        Self {
            data_type: "Text",
            name,
            value,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialDetails<'a> {
    single_sign_on_type: &'static str,
    connection_encryption: &'static str,
    skip_test_connection: bool,
    credentials: Credentials<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Credentials<'a> {
    credential_type: &'static str,
    service_principal_client_id: &'a str,
    service_principal_secret: &'a str,
    tenant_id: &'a str,
}

impl std::fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("credential_type", &self.credential_type)
            .field("service_principal_client_id", &self.service_principal_client_id)
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CreatedConnection {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BindToGatewayRequest<'a> {
    gateway_object_id: &'static str,
    datasource_object_ids: [&'a str; 1],
}
