//! Remote item service abstraction.
//!
//! The reconciliation driver talks to the hosted platform only through
//! [`ItemService`]. Implementations:
//! - `RestItemService` in the CLI crate (platform REST API)
//! - [`MemoryItemService`](crate::memory::MemoryItemService) for tests and dry runs
//!
//! Every call is request/response; long-running platform operations are
//! awaited to completion inside the implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::item::{DefinitionPart, ItemKind, WorkspaceItem};

/// Data endpoint the platform derives from a storage item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEndpoint {
    /// Identifier of the endpoint object.
    pub endpoint_id: String,
    /// Server connection string of the endpoint.
    pub connection_string: String,
}

/// Parameters for creating a live data connection.
///
/// Credentials are the transport's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    /// Connection display name.
    pub display_name: String,
    /// Server address (the endpoint connection string).
    pub server: String,
    /// Database name (the endpoint identifier).
    pub database: String,
}

impl ConnectionSpec {
    /// Builds the connection a model uses to reach `endpoint`.
    #[must_use]
    pub fn for_endpoint(display_name: impl Into<String>, endpoint: &StorageEndpoint) -> Self {
        Self {
            display_name: display_name.into(),
            server: endpoint.connection_string.clone(),
            database: endpoint.endpoint_id.clone(),
        }
    }
}

/// Operations the engine needs from the hosted item service.
#[async_trait]
pub trait ItemService: Send + Sync {
    /// Lists all items in a workspace.
    async fn list_items(&self, workspace_id: &str) -> Result<Vec<WorkspaceItem>>;

    /// Creates an item, optionally with an initial definition.
    ///
    /// Returns the created item including its new identifier.
    async fn create_item(
        &self,
        workspace_id: &str,
        display_name: &str,
        kind: &ItemKind,
        definition: Option<&[DefinitionPart]>,
    ) -> Result<WorkspaceItem>;

    /// Replaces an item's definition.
    async fn update_item_definition(
        &self,
        workspace_id: &str,
        item_id: &str,
        definition: &[DefinitionPart],
    ) -> Result<()>;

    /// Deletes an item. Callers tolerate failure.
    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> Result<()>;

    /// Fetches an item's definition, in the given format if one is named.
    async fn get_item_definition(
        &self,
        workspace_id: &str,
        item_id: &str,
        format_hint: Option<&str>,
    ) -> Result<Vec<DefinitionPart>>;

    /// Runs an item and waits for the run to complete.
    async fn run_item(&self, workspace_id: &str, item_id: &str) -> Result<()>;

    /// Resolves the data endpoint of a storage item.
    async fn resolve_storage_endpoint(
        &self,
        workspace_id: &str,
        storage_item_id: &str,
    ) -> Result<StorageEndpoint>;

    /// Creates a data connection and returns its identifier.
    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<String>;

    /// Binds an item to a data connection.
    async fn bind_item_to_connection(
        &self,
        workspace_id: &str,
        item_id: &str,
        connection_id: &str,
    ) -> Result<()>;

    /// Triggers a data refresh of an item.
    async fn refresh_item(&self, workspace_id: &str, item_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_spec_uses_endpoint_identity() {
        let endpoint = StorageEndpoint {
            endpoint_id: "ep-1".into(),
            connection_string: "abc.datawarehouse.fabric.microsoft.com".into(),
        };
        let spec = ConnectionSpec::for_endpoint("Sales Model", &endpoint);
        assert_eq!(spec.server, "abc.datawarehouse.fabric.microsoft.com");
        assert_eq!(spec.database, "ep-1");
    }
}
