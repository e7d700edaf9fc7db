//! Workspaces command - list workspaces visible to the caller.

use anyhow::Result;

use crate::client::RestItemService;
use crate::{Config, OutputFormat};

/// Execute the workspaces command.
///
/// # Errors
///
/// Returns an error if the API request fails.
pub async fn execute(config: &Config) -> Result<()> {
    let client = RestItemService::new(config)?;
    let workspaces = client.list_workspaces().await?;

    match config.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&workspaces)?);
        }
        OutputFormat::Text => {
            if workspaces.is_empty() {
                println!("No workspaces found");
                return Ok(());
            }
            for workspace in &workspaces {
                println!("  {} {}", workspace.id, workspace.display_name);
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct WorkspaceRow {
                #[tabled(rename = "Workspace ID")]
                id: String,
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "Capacity")]
                capacity: String,
            }

            let rows: Vec<_> = workspaces
                .into_iter()
                .map(|w| WorkspaceRow {
                    id: w.id,
                    name: w.display_name,
                    capacity: w.capacity_id.unwrap_or_default(),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }

    Ok(())
}
