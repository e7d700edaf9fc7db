//! Reconciliation driver.
//!
//! A run reconciles a desired item set against one target workspace:
//!
//! 1. **Storage**: create missing lakehouses, resolve every endpoint, and
//!    register source-to-target redirections for the lakehouse and endpoint.
//! 2. **Notebook**: rewrite code references, then create or update.
//! 3. **Model**: skip implicit models, rewrite connection expressions, then
//!    create (with connection, bind, and refresh) or update.
//! 4. **Report**: rebind to the target model by display name, then create or update.
//! 5. **Orphans**: delete target items absent from the desired set, tolerating
//!    per-item failures.
//!
//! Each item pass takes the redirection table by value and returns it
//! extended, so pass ordering is a visible data dependency. Remote calls are
//! issued one at a time. Nothing is rolled back on failure.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::error::Result;
use crate::item::{
    ItemDefinition, ItemIdentity, ItemKind, MODEL_EXPRESSIONS_PART,
    WorkspaceItem,
};
use crate::observability::{pass_span, sync_span};
use crate::plan::{ImplicitModels, OrphanSet, SyncPass, SyncPlan, plan_sync};
use crate::redirect::RedirectionTable;
use crate::report::{ItemOutcome, SyncAction, SyncReport, SyncRunId};
use crate::rewrite::{ModelDirectory, rebind_report, rewrite_part};
use crate::service::{ConnectionSpec, ItemService, StorageEndpoint};

/// Default delay between binding a new connection and refreshing the model.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(15);

// ============================================================================
// Configuration
// ============================================================================

/// Engine policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Run a notebook after creating it.
    pub run_notebooks_on_create: bool,
    /// Run a notebook after updating it.
    pub run_notebooks_on_update: bool,
    /// Repeat connection creation, bind, and refresh when updating a model.
    pub rebind_models_on_update: bool,
    /// Fixed delay between bind and refresh.
    pub connection_settle_delay: Duration,
    /// Delete target items absent from the desired set.
    pub delete_orphans: bool,
    /// Create live data connections for models.
    pub create_connections: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            run_notebooks_on_create: true,
            run_notebooks_on_update: false,
            rebind_models_on_update: false,
            connection_settle_delay: DEFAULT_SETTLE_DELAY,
            delete_orphans: true,
            create_connections: true,
        }
    }
}

/// Workspaces a run reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    /// Workspace being reconciled.
    pub workspace_id: String,
    /// Workspace the desired set was authored against, used to find the old
    /// identifiers that payloads reference.
    pub source_workspace_id: Option<String>,
}

impl SyncTarget {
    /// Creates a target with no source workspace.
    #[must_use]
    pub fn new(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            source_workspace_id: None,
        }
    }

    /// Sets the source workspace.
    #[must_use]
    pub fn with_source(mut self, source_workspace_id: impl Into<String>) -> Self {
        self.source_workspace_id = Some(source_workspace_id.into());
        self
    }
}

// ============================================================================
// Run state
// ============================================================================

/// Desired items bucketed by the pass that handles them.
#[derive(Debug, Default)]
struct PassInputs {
    storage: Vec<ItemDefinition>,
    notebooks: Vec<ItemDefinition>,
    models: Vec<ItemDefinition>,
    reports: Vec<ItemDefinition>,
    unmanaged: Vec<ItemDefinition>,
}

impl PassInputs {
    fn split(desired: Vec<ItemDefinition>) -> Self {
        let mut inputs = Self::default();
        for item in desired {
            match item.kind {
                ItemKind::Lakehouse => inputs.storage.push(item),
                ItemKind::Notebook => inputs.notebooks.push(item),
                ItemKind::SemanticModel => inputs.models.push(item),
                ItemKind::Report => inputs.reports.push(item),
                ItemKind::SqlEndpoint | ItemKind::Other(_) => inputs.unmanaged.push(item),
            }
        }
        inputs
    }
}

struct RunState {
    workspace: String,
    source_workspace: Option<String>,
    /// Target listing at run start, extended with every item created since.
    snapshot: Vec<WorkspaceItem>,
    source_items: Vec<WorkspaceItem>,
    implicit: ImplicitModels,
    endpoints: Vec<StorageEndpoint>,
    outcomes: Vec<ItemOutcome>,
}

impl RunState {
    fn existing(&self, identity: &ItemIdentity) -> Option<WorkspaceItem> {
        self.snapshot.iter().find(|i| i.matches(identity)).cloned()
    }

    /// Finds the item with the same identity in the source workspace.
    fn source_counterpart(&self, identity: &ItemIdentity) -> Option<WorkspaceItem> {
        let source_workspace = self.source_workspace.as_deref()?;
        let found = self.source_items.iter().find(|i| i.matches(identity)).cloned();
        if found.is_none() {
            tracing::warn!(
                item = %identity,
                source_workspace,
                "no source counterpart, references to it are not redirected"
            );
        }
        found
    }

    fn record(&mut self, identity: ItemIdentity, action: SyncAction, item_id: &str) {
        self.outcomes
            .push(ItemOutcome::new(identity, action, Some(item_id.to_string())));
    }
}

/// Picks the endpoint a model's connection should use.
///
/// Prefers an endpoint whose identifier or connection string occurs in the
/// model's expressions, then the most recently resolved one.
#[must_use]
pub fn select_endpoint<'a>(
    endpoints: &'a [StorageEndpoint],
    expressions: &str,
) -> Option<&'a StorageEndpoint> {
    let mentioned = |value: &str| !value.is_empty() && expressions.contains(value);
    endpoints
        .iter()
        .find(|e| mentioned(e.endpoint_id.as_str()) || mentioned(e.connection_string.as_str()))
        .or_else(|| endpoints.last())
}

// ============================================================================
// Engine
// ============================================================================

/// Reconciles desired item sets against target workspaces.
#[derive(Debug, Clone)]
pub struct SyncEngine<S> {
    service: S,
    options: SyncOptions,
}

impl<S: ItemService> SyncEngine<S> {
    /// Creates an engine with default options.
    #[must_use]
    pub fn new(service: S) -> Self {
        Self {
            service,
            options: SyncOptions::default(),
        }
    }

    /// Replaces the engine options.
    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the engine options.
    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Returns the item service.
    #[must_use]
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Computes what [`SyncEngine::sync`] would do without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the target workspace cannot be listed.
    pub async fn plan(&self, desired: &[ItemDefinition], workspace_id: &str) -> Result<SyncPlan> {
        let target = self.service.list_items(workspace_id).await?;
        let mut plan = plan_sync(desired, &target);
        if !self.options.delete_orphans {
            plan.protected.append(&mut plan.deletes);
        }
        Ok(plan)
    }

    /// Reconciles `desired` against the target workspace.
    ///
    /// # Errors
    ///
    /// Returns the first loader, rewriter, or remote error outside orphan
    /// deletion. Changes already made to the target are left in place.
    pub async fn sync(&self, desired: Vec<ItemDefinition>, target: &SyncTarget) -> Result<SyncReport> {
        let run_id = SyncRunId::generate();
        let span = sync_span("sync", run_id, &target.workspace_id);
        self.run(run_id, desired, target).instrument(span).await
    }

    async fn run(
        &self,
        run_id: SyncRunId,
        desired: Vec<ItemDefinition>,
        target: &SyncTarget,
    ) -> Result<SyncReport> {
        let started_at = Utc::now();
        let wanted: HashSet<ItemIdentity> = desired.iter().map(ItemDefinition::identity).collect();
        tracing::info!(items = desired.len(), "starting sync");

        let snapshot = self.service.list_items(&target.workspace_id).await?;
        let source_items = match &target.source_workspace_id {
            Some(source) => self.service.list_items(source).await?,
            None => Vec::new(),
        };

        let mut state = RunState {
            workspace: target.workspace_id.clone(),
            source_workspace: target.source_workspace_id.clone(),
            implicit: ImplicitModels::for_run(&desired, &snapshot),
            snapshot,
            source_items,
            endpoints: Vec::new(),
            outcomes: Vec::new(),
        };

        let inputs = PassInputs::split(desired);
        for item in &inputs.unmanaged {
            tracing::debug!(item = %item.identity(), "no pass manages this kind, skipping");
            state
                .outcomes
                .push(ItemOutcome::new(item.identity(), SyncAction::Skipped, None));
        }

        let table = seed_table(target)?;
        let table = self
            .storage_pass(&mut state, inputs.storage, table)
            .instrument(pass_span(SyncPass::Storage, &target.workspace_id))
            .await?;
        let table = self
            .notebook_pass(&mut state, inputs.notebooks, table)
            .instrument(pass_span(SyncPass::Notebook, &target.workspace_id))
            .await?;
        let table = self
            .model_pass(&mut state, inputs.models, table)
            .instrument(pass_span(SyncPass::Model, &target.workspace_id))
            .await?;
        let table = self
            .report_pass(&mut state, inputs.reports, table)
            .instrument(pass_span(SyncPass::Report, &target.workspace_id))
            .await?;

        if self.options.delete_orphans {
            self.orphan_pass(&mut state, &wanted)
                .instrument(pass_span(SyncPass::Orphans, &target.workspace_id))
                .await?;
        } else {
            tracing::info!("orphan deletion disabled");
        }

        let report = SyncReport {
            run_id,
            target_workspace: target.workspace_id.clone(),
            started_at,
            completed_at: Utc::now(),
            outcomes: state.outcomes,
            redirections: table.len(),
        };
        tracing::info!(
            created = report.count(SyncAction::Created),
            updated = report.count(SyncAction::Updated),
            deleted = report.count(SyncAction::Deleted),
            failures = report.failures().len(),
            redirections = report.redirections,
            "sync complete"
        );
        Ok(report)
    }

    async fn storage_pass(
        &self,
        state: &mut RunState,
        items: Vec<ItemDefinition>,
        mut table: RedirectionTable,
    ) -> Result<RedirectionTable> {
        for definition in items {
            let identity = definition.identity();
            let (item, action) = match state.existing(&identity) {
                Some(existing) => (existing, SyncAction::Unchanged),
                None => {
                    tracing::info!(item = %identity, "creating item");
                    let created = self
                        .service
                        .create_item(&state.workspace, &definition.display_name, &definition.kind, None)
                        .await?;
                    state.snapshot.push(created.clone());
                    (created, SyncAction::Created)
                }
            };

            let endpoint = self
                .service
                .resolve_storage_endpoint(&state.workspace, &item.id)
                .await?;
            tracing::info!(
                item = %identity,
                item_id = %item.id,
                endpoint_id = %endpoint.endpoint_id,
                "resolved storage endpoint"
            );

            if let Some(source) = state.source_counterpart(&identity) {
                table.register(&source.id, &item.id)?;
                let source_ws = state.source_workspace.clone().unwrap_or_default();
                let source_endpoint = self
                    .service
                    .resolve_storage_endpoint(&source_ws, &source.id)
                    .await?;
                table.register_pair(
                    source_endpoint.connection_string,
                    endpoint.connection_string.clone(),
                    source_endpoint.endpoint_id,
                    endpoint.endpoint_id.clone(),
                )?;
            }

            state.endpoints.push(endpoint);
            state.record(identity, action, &item.id);
        }
        Ok(table)
    }

    async fn notebook_pass(
        &self,
        state: &mut RunState,
        items: Vec<ItemDefinition>,
        table: RedirectionTable,
    ) -> Result<RedirectionTable> {
        for definition in items {
            let definition = redirect_references(definition, &table)?;
            let (item, action) = self.upsert(state, &definition).await?;

            let run = match action {
                SyncAction::Created => self.options.run_notebooks_on_create,
                _ => self.options.run_notebooks_on_update,
            };
            if run {
                tracing::info!(item = %definition.identity(), item_id = %item.id, "running notebook");
                self.service.run_item(&state.workspace, &item.id).await?;
            }

            state.record(definition.identity(), action, &item.id);
        }
        Ok(table)
    }

    async fn model_pass(
        &self,
        state: &mut RunState,
        items: Vec<ItemDefinition>,
        mut table: RedirectionTable,
    ) -> Result<RedirectionTable> {
        for definition in items {
            let identity = definition.identity();
            if let Some(owner) = state.implicit.owner_of(&identity) {
                tracing::debug!(item = %identity, storage = %owner.storage, "skipping implicit model");
                let outcome = ItemOutcome::new(identity, SyncAction::Skipped, None)
                    .with_detail(format!("implicit model of lakehouse '{}'", owner.storage));
                state.outcomes.push(outcome);
                continue;
            }

            let definition = redirect_references(definition, &table)?;
            let (item, action) = self.upsert(state, &definition).await?;

            if action == SyncAction::Created || self.options.rebind_models_on_update {
                let expressions = definition
                    .require_part(MODEL_EXPRESSIONS_PART)?
                    .decode_text()?;
                self.connect_model(state, &item, &expressions).await?;
            }

            if let Some(source) = state.source_counterpart(&identity) {
                table.register(&source.id, &item.id)?;
            }
            state.record(identity, action, &item.id);
        }
        Ok(table)
    }

    async fn report_pass(
        &self,
        state: &mut RunState,
        items: Vec<ItemDefinition>,
        table: RedirectionTable,
    ) -> Result<RedirectionTable> {
        if items.is_empty() {
            return Ok(table);
        }

        let directory = ModelDirectory::from_items(&self.service.list_items(&state.workspace).await?);
        tracing::debug!(models = directory.len(), "loaded target model directory");

        for definition in items {
            let definition = rebind_report(definition, &directory)?;
            let (item, action) = self.upsert(state, &definition).await?;
            state.record(definition.identity(), action, &item.id);
        }
        Ok(table)
    }

    async fn orphan_pass(&self, state: &mut RunState, wanted: &HashSet<ItemIdentity>) -> Result<()> {
        let snapshot = state.snapshot.clone();
        let orphans = OrphanSet::classify(&snapshot, wanted, &state.implicit);

        for item in &orphans.protected {
            tracing::debug!(item = %item.identity(), item_id = %item.id, "keeping derived item");
        }

        for item in orphans.deletable {
            let identity = item.identity();
            tracing::info!(item = %identity, item_id = %item.id, "deleting orphan");
            match self.service.delete_item(&state.workspace, &item.id).await {
                Ok(()) => {
                    state.snapshot.retain(|i| i.id != item.id);
                    state.record(identity, SyncAction::Deleted, &item.id);
                }
                Err(e) => {
                    tracing::warn!(item = %identity, item_id = %item.id, error = %e, "failed to delete orphan");
                    state.outcomes.push(
                        ItemOutcome::new(identity, SyncAction::DeleteFailed, Some(item.id.clone()))
                            .with_detail(e.to_string()),
                    );
                }
            }
        }
        Ok(())
    }

    /// Creates the item with its definition, or replaces the definition of the existing one.
    async fn upsert(
        &self,
        state: &mut RunState,
        definition: &ItemDefinition,
    ) -> Result<(WorkspaceItem, SyncAction)> {
        let identity = definition.identity();
        if let Some(existing) = state.existing(&identity) {
            tracing::info!(item = %identity, item_id = %existing.id, "updating item");
            self.service
                .update_item_definition(&state.workspace, &existing.id, &definition.parts)
                .await?;
            return Ok((existing, SyncAction::Updated));
        }

        tracing::info!(item = %identity, "creating item");
        let created = self
            .service
            .create_item(
                &state.workspace,
                &definition.display_name,
                &definition.kind,
                Some(&definition.parts),
            )
            .await?;
        state.snapshot.push(created.clone());
        Ok((created, SyncAction::Created))
    }

    async fn connect_model(&self, state: &RunState, model: &WorkspaceItem, expressions: &str) -> Result<()> {
        if !self.options.create_connections {
            tracing::warn!(item = %model.identity(), "connection creation disabled, model is not bound");
            return Ok(());
        }
        let Some(endpoint) = select_endpoint(&state.endpoints, expressions) else {
            tracing::warn!(item = %model.identity(), "no storage endpoint resolved in this run, model is not bound");
            return Ok(());
        };

        let spec = ConnectionSpec::for_endpoint(format!("{}-{}", model.display_name, model.id), endpoint);
        let connection_id = self.service.create_connection(&spec).await?;
        self.service
            .bind_item_to_connection(&state.workspace, &model.id, &connection_id)
            .await?;
        tracing::info!(
            item = %model.identity(),
            item_id = %model.id,
            connection_id = %connection_id,
            "bound model to connection"
        );

        let delay = self.options.connection_settle_delay;
        if !delay.is_zero() {
            tracing::debug!(delay_secs = delay.as_secs_f64(), "waiting for connection to settle");
            tokio::time::sleep(delay).await;
        }

        self.service.refresh_item(&state.workspace, &model.id).await?;
        tracing::info!(item = %model.identity(), item_id = %model.id, "refreshed model");
        Ok(())
    }
}

/// Rewrites the part that carries identifier references for the item's kind.
fn redirect_references(definition: ItemDefinition, table: &RedirectionTable) -> Result<ItemDefinition> {
    match definition.kind.redirected_part() {
        Some(part) => rewrite_part(definition, part, table),
        None => Ok(definition),
    }
}

/// Seeds a run's table with the workspace redirection.
fn seed_table(target: &SyncTarget) -> Result<RedirectionTable> {
    let mut table = RedirectionTable::new();
    if let Some(source) = &target.source_workspace_id {
        table.register(source, &target.workspace_id)?;
    } else {
        tracing::warn!("no source workspace, only references to items created by name are redirected");
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::DefinitionPart;

    fn endpoint(id: &str, conn: &str) -> StorageEndpoint {
        StorageEndpoint {
            endpoint_id: id.into(),
            connection_string: conn.into(),
        }
    }

    #[test]
    fn default_options_match_update_policy() {
        let options = SyncOptions::default();
        assert!(options.run_notebooks_on_create);
        assert!(!options.run_notebooks_on_update);
        assert!(!options.rebind_models_on_update);
        assert_eq!(options.connection_settle_delay, Duration::from_secs(15));
        assert!(options.delete_orphans);
        assert!(options.create_connections);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: SyncOptions =
            serde_json::from_str(r#"{"run_notebooks_on_update":true}"#).unwrap();
        assert!(options.run_notebooks_on_update);
        assert!(options.run_notebooks_on_create);
    }

    #[test]
    fn endpoint_selection_prefers_mentioned() {
        let endpoints = [endpoint("ep-a", "srv-a"), endpoint("ep-b", "srv-b")];
        assert_eq!(
            select_endpoint(&endpoints, "Sql.Database(\"srv-a\", \"ep-a\")").unwrap().endpoint_id,
            "ep-a"
        );
        assert_eq!(
            select_endpoint(&endpoints, "nothing here").unwrap().endpoint_id,
            "ep-b"
        );
        assert!(select_endpoint(&[], "x").is_none());
    }

    #[test]
    fn endpoint_selection_ignores_empty_values() {
        let endpoints = [endpoint("ep-a", ""), endpoint("ep-b", "srv-b")];
        assert_eq!(
            select_endpoint(&endpoints, "srv-b").unwrap().endpoint_id,
            "ep-b"
        );
    }

    #[test]
    fn seeding_registers_workspace_pair() {
        let table = seed_table(&SyncTarget::new("dst").with_source("src")).unwrap();
        assert_eq!(table.lookup("src"), Some("dst"));
        assert!(seed_table(&SyncTarget::new("dst")).unwrap().is_empty());
    }

    #[test]
    fn references_are_redirected_in_the_kind_specific_part() {
        let mut table = RedirectionTable::new();
        table.register("old-id", "new-id").unwrap();

        let notebook = ItemDefinition::new("Load", ItemKind::Notebook)
            .with_part(DefinitionPart::from_text(crate::item::NOTEBOOK_CONTENT_PART, "lh = 'old-id'"))
            .with_part(DefinitionPart::from_text("other.txt", "old-id"));
        let notebook = redirect_references(notebook, &table).unwrap();
        assert_eq!(
            notebook.part(crate::item::NOTEBOOK_CONTENT_PART).unwrap().decode_text().unwrap(),
            "lh = 'new-id'"
        );
        assert_eq!(notebook.part("other.txt").unwrap().decode_text().unwrap(), "old-id");

        let model = ItemDefinition::new("Sales Model", ItemKind::SemanticModel)
            .with_part(DefinitionPart::from_text(MODEL_EXPRESSIONS_PART, "Sql.Database(\"old-id\")"));
        let model = redirect_references(model, &table).unwrap();
        assert!(model.part(MODEL_EXPRESSIONS_PART).unwrap().decode_text().unwrap().contains("new-id"));

        let report = ItemDefinition::new("Sales", ItemKind::Report)
            .with_part(DefinitionPart::from_text("report.json", "old-id"));
        let report = redirect_references(report, &table).unwrap();
        assert_eq!(report.part("report.json").unwrap().decode_text().unwrap(), "old-id");
    }

    #[test]
    fn inputs_split_by_kind() {
        let inputs = PassInputs::split(vec![
            ItemDefinition::new("R", ItemKind::Report),
            ItemDefinition::new("S", ItemKind::Lakehouse),
            ItemDefinition::new("P", ItemKind::Other("DataPipeline".into())),
        ]);
        assert_eq!(inputs.storage.len(), 1);
        assert_eq!(inputs.reports.len(), 1);
        assert_eq!(inputs.unmanaged.len(), 1);
    }
}
