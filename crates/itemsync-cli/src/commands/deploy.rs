//! Deploy command - reconcile a project's items into a workspace.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;

use itemsync_core::engine::{SyncEngine, SyncOptions, SyncTarget};
use itemsync_core::report::{SyncAction, SyncReport};

use super::{ProjectArgs, format_action_colored};
use crate::client::RestItemService;
use crate::{Config, OutputFormat};

/// Arguments for the deploy command.
#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Project to deploy.
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Target workspace (ID or display name).
    #[arg(long, short = 'w')]
    pub target_workspace: String,

    /// Workspace the project was authored in (defaults to the project name).
    #[arg(long)]
    pub source_workspace: Option<String>,

    /// Create the target workspace if it does not exist.
    #[arg(long)]
    pub create_workspace: bool,

    /// Capacity to assign a newly created workspace to.
    #[arg(long, requires = "create_workspace")]
    pub capacity_id: Option<String>,

    /// Run notebooks after updating them, not only after creating them.
    #[arg(long)]
    pub run_notebooks_on_update: bool,

    /// Recreate and rebind model connections when updating models.
    #[arg(long)]
    pub rebind_models_on_update: bool,

    /// Seconds to wait between binding a connection and refreshing a model.
    #[arg(long, default_value = "15")]
    pub settle_delay_secs: u64,

    /// Keep target items that are not in the project.
    #[arg(long)]
    pub keep_orphans: bool,
}

impl DeployArgs {
    fn options(&self, config: &Config) -> SyncOptions {
        SyncOptions {
            run_notebooks_on_update: self.run_notebooks_on_update,
            rebind_models_on_update: self.rebind_models_on_update,
            connection_settle_delay: Duration::from_secs(self.settle_delay_secs),
            delete_orphans: !self.keep_orphans,
            create_connections: config.service_principal.is_some(),
            ..SyncOptions::default()
        }
    }
}

/// Execute the deploy command.
///
/// # Errors
///
/// Returns an error if the project cannot be loaded, the target workspace
/// cannot be found or created, or the run aborts.
pub async fn execute(args: DeployArgs, config: &Config) -> Result<()> {
    let desired = args.project.load().await?;
    let client = RestItemService::new(config)?;

    let target = match client.resolve_workspace(&args.target_workspace).await? {
        Some(workspace) => workspace,
        None if args.create_workspace => {
            tracing::info!(workspace = %args.target_workspace, "creating target workspace");
            client
                .create_workspace(&args.target_workspace, args.capacity_id.as_deref())
                .await
                .context("Failed to create target workspace")?
        }
        None => anyhow::bail!(
            "Workspace '{}' not found. Use --create-workspace to create it",
            args.target_workspace
        ),
    };

    let source_name = args
        .source_workspace
        .as_deref()
        .unwrap_or(&args.project.project);
    let mut sync_target = SyncTarget::new(&target.id);
    match client.resolve_workspace(source_name).await? {
        Some(source) if source.id == target.id => {
            tracing::warn!(workspace = %source_name, "source and target are the same workspace");
        }
        Some(source) => sync_target = sync_target.with_source(source.id),
        None => tracing::warn!(
            workspace = %source_name,
            "source workspace not found, payload references will not be redirected"
        ),
    }

    let options = args.options(config);
    if !options.create_connections {
        tracing::warn!("service principal not configured, models will not be connected");
    }

    let engine = SyncEngine::new(client).with_options(options);
    let report = engine.sync(desired, &sync_target).await?;

    print_report(&report, &target.display_name, config)
}

fn print_report(report: &SyncReport, workspace_name: &str, config: &Config) -> Result<()> {
    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(report).context("Failed to serialize report")?
            );
        }
        OutputFormat::Text => {
            println!("Deployed to {workspace_name} (run {})", report.run_id);
            println!();
            for outcome in &report.outcomes {
                let id = outcome
                    .item_id
                    .as_ref()
                    .map_or(String::new(), |id| format!(" ({id})"));
                println!(
                    "  {:<14} {}{id}",
                    format_action_colored(outcome.action),
                    outcome.item
                );
                if let Some(detail) = &outcome.detail {
                    println!("    {}", detail.dimmed());
                }
            }
            println!();
            println!(
                "  Created: {}  Updated: {}  Deleted: {}  Redirections: {}",
                report.count(SyncAction::Created),
                report.count(SyncAction::Updated),
                report.count(SyncAction::Deleted),
                report.redirections
            );
            let failures = report.failures();
            if !failures.is_empty() {
                println!("  {}", format!("{} deletion(s) failed", failures.len()).red());
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct OutcomeRow {
                #[tabled(rename = "Item")]
                item: String,
                #[tabled(rename = "Kind")]
                kind: String,
                #[tabled(rename = "Action")]
                action: String,
                #[tabled(rename = "Item ID")]
                item_id: String,
                #[tabled(rename = "Detail")]
                detail: String,
            }

            let rows: Vec<_> = report
                .outcomes
                .iter()
                .map(|o| OutcomeRow {
                    item: o.item.display_name.clone(),
                    kind: o.item.kind.to_string(),
                    action: o.action.to_string(),
                    item_id: o.item_id.clone().unwrap_or_default(),
                    detail: o.detail.clone().unwrap_or_default(),
                })
                .collect();

            if rows.is_empty() {
                println!("Nothing to deploy");
            } else {
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}
