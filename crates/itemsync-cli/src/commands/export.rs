//! Export command - write a workspace's items as project folders.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use itemsync_core::export::export_item_set;
use itemsync_core::loader::load_item_set;

use super::require_workspace;
use crate::client::RestItemService;
use crate::source::write_tracked_files;
use crate::{Config, OutputFormat};

/// Arguments for the export command.
#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Workspace to export (ID or display name).
    #[arg(long, short = 'w')]
    pub workspace: String,

    /// Directory to write item folders into.
    #[arg(long, short = 'o')]
    pub out: PathBuf,
}

/// Execute the export command.
///
/// # Errors
///
/// Returns an error if the workspace cannot be read or a file cannot be written.
pub async fn execute(args: ExportArgs, config: &Config) -> Result<()> {
    let client = RestItemService::new(config)?;
    let workspace = require_workspace(&client, &args.workspace).await?;

    let files = export_item_set(&client, &workspace.id).await?;
    let items = load_item_set(&files)?;
    write_tracked_files(&args.out, &files)
        .with_context(|| format!("Failed to write export to {}", args.out.display()))?;

    match config.format {
        OutputFormat::Json => {
            let names: Vec<String> = items.iter().map(|i| i.identity().to_string()).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "workspaceId": workspace.id,
                    "out": args.out,
                    "items": names,
                    "fileCount": files.len(),
                }))?
            );
        }
        OutputFormat::Text | OutputFormat::Table => {
            println!(
                "Exported {} item(s) from {} to {}",
                items.len(),
                workspace.display_name,
                args.out.display()
            );
            for item in &items {
                println!("  {}", item.identity());
            }
        }
    }

    Ok(())
}
