//! Items command - list items in a workspace.

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;

use itemsync_core::service::ItemService;

use super::require_workspace;
use crate::client::RestItemService;
use crate::{Config, OutputFormat};

/// Arguments for the items command.
#[derive(Debug, Args)]
pub struct ItemsArgs {
    /// Workspace (ID or display name).
    #[arg(long, short = 'w')]
    pub workspace: String,

    /// Only list items of this kind (for example `Notebook`).
    #[arg(long, short = 'k')]
    pub kind: Option<String>,
}

/// Execute the items command.
///
/// # Errors
///
/// Returns an error if the workspace cannot be found or listed.
pub async fn execute(args: ItemsArgs, config: &Config) -> Result<()> {
    let client = RestItemService::new(config)?;
    let workspace = require_workspace(&client, &args.workspace).await?;

    let mut items = client.list_items(&workspace.id).await?;
    if let Some(kind) = &args.kind {
        items.retain(|i| i.kind.as_str().eq_ignore_ascii_case(kind));
    }

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No items found");
                return Ok(());
            }

            println!("Items in {}:", workspace.display_name);
            println!();
            for item in &items {
                let kind = item.kind.to_string();
                let kind = if item.kind.is_derived() {
                    kind.dimmed().to_string()
                } else {
                    kind.cyan().to_string()
                };
                println!("  {} {} ({kind})", item.id, item.display_name);
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ItemRow {
                #[tabled(rename = "Item ID")]
                id: String,
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "Kind")]
                kind: String,
            }

            let rows: Vec<_> = items
                .into_iter()
                .map(|i| ItemRow {
                    kind: i.kind.to_string(),
                    id: i.id,
                    name: i.display_name,
                })
                .collect();

            if rows.is_empty() {
                println!("No items found");
            } else {
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}
