//! CLI command implementations.

pub mod deploy;
pub mod export;
pub mod items;
pub mod plan;
pub mod workspaces;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;

use itemsync_core::item::ItemDefinition;
use itemsync_core::loader::load_item_set;
use itemsync_core::report::SyncAction;
use itemsync_core::source::TrackedFileSource;

use crate::client::{RestItemService, Workspace};
use crate::source::DirectorySource;

/// Selects the project whose items are the desired set.
#[derive(Debug, Args)]
pub struct ProjectArgs {
    /// Project folder name under the source directory.
    #[arg(long, short = 'p')]
    pub project: String,

    /// Directory holding project folders.
    #[arg(long, default_value = ".")]
    pub source_dir: PathBuf,
}

impl ProjectArgs {
    /// Loads the project's item set from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be listed or loaded.
    pub async fn load(&self) -> Result<Vec<ItemDefinition>> {
        let source = DirectorySource::new(&self.source_dir);
        let files = source
            .list_tracked_files(&self.project)
            .await
            .with_context(|| format!("Failed to read project '{}'", self.project))?;
        let items = load_item_set(&files)
            .with_context(|| format!("Failed to load item set of project '{}'", self.project))?;
        Ok(items)
    }
}

/// Looks up a workspace by ID or display name, failing when absent.
pub(crate) async fn require_workspace(client: &RestItemService, name_or_id: &str) -> Result<Workspace> {
    client
        .resolve_workspace(name_or_id)
        .await?
        .with_context(|| format!("Workspace '{name_or_id}' not found"))
}

pub(crate) fn format_action_colored(action: SyncAction) -> String {
    let label = action.as_str();
    match action {
        SyncAction::Created => label.green().to_string(),
        SyncAction::Updated => label.blue().to_string(),
        SyncAction::Deleted => label.yellow().to_string(),
        SyncAction::DeleteFailed => label.red().to_string(),
        SyncAction::Unchanged | SyncAction::Skipped => label.dimmed().to_string(),
    }
}
