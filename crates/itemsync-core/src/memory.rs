//! In-memory item service for testing and dry runs.
//!
//! Mimics the platform side effects the engine depends on: creating a
//! lakehouse also creates its `SQLEndpoint` item and a same-named implicit
//! semantic model. Every trait call is recorded in order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::item::{DefinitionPart, ItemKind, WorkspaceItem};
use crate::service::{ConnectionSpec, ItemService, StorageEndpoint};

/// Record of an [`ItemService`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    /// `list_items`.
    ListItems {
        /// Workspace listed.
        workspace: String,
    },
    /// `create_item`.
    CreateItem {
        /// Workspace the item was created in.
        workspace: String,
        /// Display name.
        display_name: String,
        /// Item kind.
        kind: ItemKind,
    },
    /// `update_item_definition`.
    UpdateItemDefinition {
        /// Workspace of the item.
        workspace: String,
        /// Updated item.
        item_id: String,
    },
    /// `delete_item`.
    DeleteItem {
        /// Workspace of the item.
        workspace: String,
        /// Deleted item.
        item_id: String,
    },
    /// `get_item_definition`.
    GetItemDefinition {
        /// Workspace of the item.
        workspace: String,
        /// Item read.
        item_id: String,
        /// Requested format.
        format_hint: Option<String>,
    },
    /// `run_item`.
    RunItem {
        /// Workspace of the item.
        workspace: String,
        /// Item run.
        item_id: String,
    },
    /// `resolve_storage_endpoint`.
    ResolveStorageEndpoint {
        /// Workspace of the storage item.
        workspace: String,
        /// Storage item resolved.
        item_id: String,
    },
    /// `create_connection`.
    CreateConnection {
        /// Requested connection.
        spec: ConnectionSpec,
    },
    /// `bind_item_to_connection`.
    BindItemToConnection {
        /// Workspace of the item.
        workspace: String,
        /// Bound item.
        item_id: String,
        /// Connection bound to.
        connection_id: String,
    },
    /// `refresh_item`.
    RefreshItem {
        /// Workspace of the item.
        workspace: String,
        /// Refreshed item.
        item_id: String,
    },
}

impl ServiceCall {
    /// Returns true for calls that change remote state.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::ListItems { .. }
                | Self::GetItemDefinition { .. }
                | Self::ResolveStorageEndpoint { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct StoredItem {
    item: WorkspaceItem,
    parts: Vec<DefinitionPart>,
    endpoint: Option<StorageEndpoint>,
    connection: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    workspaces: HashMap<String, Vec<StoredItem>>,
    connections: Vec<(String, ConnectionSpec)>,
    calls: Vec<ServiceCall>,
    fail_delete: HashSet<String>,
}

impl State {
    fn find(&self, workspace: &str, item_id: &str) -> Option<&StoredItem> {
        self.workspaces
            .get(workspace)?
            .iter()
            .find(|s| s.item.id == item_id)
    }

    fn find_mut(&mut self, workspace: &str, item_id: &str) -> Option<&mut StoredItem> {
        self.workspaces
            .get_mut(workspace)?
            .iter_mut()
            .find(|s| s.item.id == item_id)
    }

    fn insert(
        &mut self,
        workspace: &str,
        display_name: &str,
        kind: &ItemKind,
        parts: Vec<DefinitionPart>,
    ) -> WorkspaceItem {
        let item = WorkspaceItem {
            id: Ulid::new().to_string(),
            display_name: display_name.to_string(),
            kind: kind.clone(),
        };

        let mut derived = Vec::new();
        let endpoint = if *kind == ItemKind::Lakehouse {
            let endpoint_item = WorkspaceItem {
                id: Ulid::new().to_string(),
                display_name: display_name.to_string(),
                kind: ItemKind::SqlEndpoint,
            };
            let endpoint = StorageEndpoint {
                endpoint_id: endpoint_item.id.clone(),
                connection_string: format!(
                    "{}.datawarehouse.fabric.microsoft.com",
                    workspace.to_lowercase()
                ),
            };
            derived.push(endpoint_item);
            derived.push(WorkspaceItem {
                id: Ulid::new().to_string(),
                display_name: display_name.to_string(),
                kind: ItemKind::SemanticModel,
            });
            Some(endpoint)
        } else {
            None
        };

        let items = self.workspaces.entry(workspace.to_string()).or_default();
        items.push(StoredItem {
            item: item.clone(),
            parts,
            endpoint,
            connection: None,
        });
        items.extend(derived.into_iter().map(|item| StoredItem {
            item,
            parts: Vec::new(),
            endpoint: None,
            connection: None,
        }));
        item
    }
}

fn not_found(operation: &'static str, workspace: &str, item_id: &str) -> Error {
    Error::remote(
        operation,
        format!("workspace {workspace} item {item_id}"),
        "item not found",
    )
}

/// In-memory [`ItemService`].
///
/// Thread-safe via `RwLock`. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryItemService {
    state: Arc<RwLock<State>>,
}

impl MemoryItemService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }

    fn record(&self, call: ServiceCall) -> Result<RwLockWriteGuard<'_, State>> {
        let mut state = self.write()?;
        state.calls.push(call);
        Ok(state)
    }

    /// Adds an item without recording a call, with the same side effects as `create_item`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn seed_item(
        &self,
        workspace_id: &str,
        display_name: &str,
        kind: ItemKind,
        parts: Vec<DefinitionPart>,
    ) -> Result<WorkspaceItem> {
        Ok(self.write()?.insert(workspace_id, display_name, &kind, parts))
    }

    /// Returns the items of a workspace in creation order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn items(&self, workspace_id: &str) -> Result<Vec<WorkspaceItem>> {
        Ok(self
            .read()?
            .workspaces
            .get(workspace_id)
            .map(|items| items.iter().map(|s| s.item.clone()).collect())
            .unwrap_or_default())
    }

    /// Returns the stored definition of an item.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn definition(&self, workspace_id: &str, item_id: &str) -> Result<Option<Vec<DefinitionPart>>> {
        Ok(self
            .read()?
            .find(workspace_id, item_id)
            .map(|s| s.parts.clone()))
    }

    /// Returns the connection an item is bound to.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn binding(&self, workspace_id: &str, item_id: &str) -> Result<Option<String>> {
        Ok(self
            .read()?
            .find(workspace_id, item_id)
            .and_then(|s| s.connection.clone()))
    }

    /// Returns created connections as `(id, spec)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn connections(&self) -> Result<Vec<(String, ConnectionSpec)>> {
        Ok(self.read()?.connections.clone())
    }

    /// Returns every recorded call in order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn calls(&self) -> Result<Vec<ServiceCall>> {
        Ok(self.read()?.calls.clone())
    }

    /// Clears recorded calls.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn clear_calls(&self) -> Result<()> {
        self.write()?.calls.clear();
        Ok(())
    }

    /// Makes every later `delete_item` of `item_id` fail.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn fail_delete(&self, item_id: impl Into<String>) -> Result<()> {
        self.write()?.fail_delete.insert(item_id.into());
        Ok(())
    }
}

#[async_trait]
impl ItemService for MemoryItemService {
    async fn list_items(&self, workspace_id: &str) -> Result<Vec<WorkspaceItem>> {
        drop(self.record(ServiceCall::ListItems {
            workspace: workspace_id.to_string(),
        })?);
        self.items(workspace_id)
    }

    async fn create_item(
        &self,
        workspace_id: &str,
        display_name: &str,
        kind: &ItemKind,
        definition: Option<&[DefinitionPart]>,
    ) -> Result<WorkspaceItem> {
        let mut state = self.record(ServiceCall::CreateItem {
            workspace: workspace_id.to_string(),
            display_name: display_name.to_string(),
            kind: kind.clone(),
        })?;

        let duplicate = state
            .workspaces
            .get(workspace_id)
            .is_some_and(|items| {
                items
                    .iter()
                    .any(|s| s.item.kind == *kind && s.item.display_name == display_name)
            });
        if duplicate {
            return Err(Error::remote(
                "create_item",
                format!("workspace {workspace_id} item {display_name}.{kind}"),
                "ItemDisplayNameAlreadyInUse",
            ));
        }

        let parts = definition.map(<[DefinitionPart]>::to_vec).unwrap_or_default();
        Ok(state.insert(workspace_id, display_name, kind, parts))
    }

    async fn update_item_definition(
        &self,
        workspace_id: &str,
        item_id: &str,
        definition: &[DefinitionPart],
    ) -> Result<()> {
        let mut state = self.record(ServiceCall::UpdateItemDefinition {
            workspace: workspace_id.to_string(),
            item_id: item_id.to_string(),
        })?;
        let stored = state
            .find_mut(workspace_id, item_id)
            .ok_or_else(|| not_found("update_item_definition", workspace_id, item_id))?;
        stored.parts = definition.to_vec();
        Ok(())
    }

    async fn delete_item(&self, workspace_id: &str, item_id: &str) -> Result<()> {
        let mut state = self.record(ServiceCall::DeleteItem {
            workspace: workspace_id.to_string(),
            item_id: item_id.to_string(),
        })?;

        if state.fail_delete.contains(item_id) {
            return Err(Error::remote(
                "delete_item",
                format!("workspace {workspace_id} item {item_id}"),
                "item is locked",
            ));
        }

        let items = state
            .workspaces
            .get_mut(workspace_id)
            .ok_or_else(|| not_found("delete_item", workspace_id, item_id))?;
        let before = items.len();
        items.retain(|s| s.item.id != item_id);
        if items.len() == before {
            return Err(not_found("delete_item", workspace_id, item_id));
        }
        Ok(())
    }

    async fn get_item_definition(
        &self,
        workspace_id: &str,
        item_id: &str,
        format_hint: Option<&str>,
    ) -> Result<Vec<DefinitionPart>> {
        let state = self.record(ServiceCall::GetItemDefinition {
            workspace: workspace_id.to_string(),
            item_id: item_id.to_string(),
            format_hint: format_hint.map(str::to_string),
        })?;
        state
            .find(workspace_id, item_id)
            .map(|s| s.parts.clone())
            .ok_or_else(|| not_found("get_item_definition", workspace_id, item_id))
    }

    async fn run_item(&self, workspace_id: &str, item_id: &str) -> Result<()> {
        let state = self.record(ServiceCall::RunItem {
            workspace: workspace_id.to_string(),
            item_id: item_id.to_string(),
        })?;
        state
            .find(workspace_id, item_id)
            .map(|_| ())
            .ok_or_else(|| not_found("run_item", workspace_id, item_id))
    }

    async fn resolve_storage_endpoint(
        &self,
        workspace_id: &str,
        storage_item_id: &str,
    ) -> Result<StorageEndpoint> {
        let state = self.record(ServiceCall::ResolveStorageEndpoint {
            workspace: workspace_id.to_string(),
            item_id: storage_item_id.to_string(),
        })?;
        let stored = state
            .find(workspace_id, storage_item_id)
            .ok_or_else(|| not_found("resolve_storage_endpoint", workspace_id, storage_item_id))?;
        stored.endpoint.clone().ok_or_else(|| {
            Error::remote(
                "resolve_storage_endpoint",
                format!("workspace {workspace_id} item {storage_item_id}"),
                format!("item is a {}, not a storage item", stored.item.kind),
            )
        })
    }

    async fn create_connection(&self, spec: &ConnectionSpec) -> Result<String> {
        let mut state = self.record(ServiceCall::CreateConnection { spec: spec.clone() })?;
        let id = Ulid::new().to_string();
        state.connections.push((id.clone(), spec.clone()));
        Ok(id)
    }

    async fn bind_item_to_connection(
        &self,
        workspace_id: &str,
        item_id: &str,
        connection_id: &str,
    ) -> Result<()> {
        let mut state = self.record(ServiceCall::BindItemToConnection {
            workspace: workspace_id.to_string(),
            item_id: item_id.to_string(),
            connection_id: connection_id.to_string(),
        })?;
        if !state.connections.iter().any(|(id, _)| id == connection_id) {
            return Err(Error::remote(
                "bind_item_to_connection",
                format!("connection {connection_id}"),
                "connection not found",
            ));
        }
        let stored = state
            .find_mut(workspace_id, item_id)
            .ok_or_else(|| not_found("bind_item_to_connection", workspace_id, item_id))?;
        stored.connection = Some(connection_id.to_string());
        Ok(())
    }

    async fn refresh_item(&self, workspace_id: &str, item_id: &str) -> Result<()> {
        let state = self.record(ServiceCall::RefreshItem {
            workspace: workspace_id.to_string(),
            item_id: item_id.to_string(),
        })?;
        state
            .find(workspace_id, item_id)
            .map(|_| ())
            .ok_or_else(|| not_found("refresh_item", workspace_id, item_id))
    }
}
