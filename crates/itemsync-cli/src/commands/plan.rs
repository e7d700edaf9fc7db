//! Plan command - show what a deploy would change.

use anyhow::{Context, Result};
use clap::Args;
use owo_colors::OwoColorize;

use itemsync_core::engine::{SyncEngine, SyncOptions};
use itemsync_core::item::ItemIdentity;
use itemsync_core::plan::SyncPlan;

use super::{ProjectArgs, require_workspace};
use crate::client::RestItemService;
use crate::{Config, OutputFormat};

/// Arguments for the plan command.
#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Project to plan.
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Target workspace (ID or display name).
    #[arg(long, short = 'w')]
    pub target_workspace: String,

    /// Keep target items that are not in the project.
    #[arg(long)]
    pub keep_orphans: bool,
}

/// Execute the plan command.
///
/// # Errors
///
/// Returns an error if the project cannot be loaded or the target workspace
/// cannot be listed.
pub async fn execute(args: PlanArgs, config: &Config) -> Result<()> {
    let desired = args.project.load().await?;
    let client = RestItemService::new(config)?;
    let target = require_workspace(&client, &args.target_workspace).await?;

    let options = SyncOptions {
        delete_orphans: !args.keep_orphans,
        ..SyncOptions::default()
    };
    let engine = SyncEngine::new(client).with_options(options);
    let plan = engine.plan(&desired, &target.id).await?;

    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?
            );
        }
        OutputFormat::Text => {
            if plan.is_empty() {
                println!("No changes for {}", target.display_name);
                return Ok(());
            }
            println!("Plan for {}:", target.display_name);
            println!();
            for (label, items) in sections(&plan) {
                for item in items {
                    println!("  {label} {item}");
                }
            }
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct PlanRow {
                #[tabled(rename = "Item")]
                item: String,
                #[tabled(rename = "Kind")]
                kind: String,
                #[tabled(rename = "Change")]
                change: &'static str,
            }

            let rows: Vec<_> = sections(&plan)
                .into_iter()
                .flat_map(|(label, items)| {
                    items.iter().map(move |i| PlanRow {
                        item: i.display_name.clone(),
                        kind: i.kind.to_string(),
                        change: label_text(label),
                    })
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Change {
    Create,
    Update,
    Keep,
    Delete,
    Protect,
    Skip,
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = label_text(*self);
        match self {
            Self::Create => write!(f, "{}", text.green()),
            Self::Update => write!(f, "{}", text.blue()),
            Self::Delete => write!(f, "{}", text.red()),
            Self::Keep | Self::Protect | Self::Skip => write!(f, "{}", text.dimmed()),
        }
    }
}

fn label_text(change: Change) -> &'static str {
    match change {
        Change::Create => "+ create ",
        Change::Update => "~ update ",
        Change::Keep => "= keep   ",
        Change::Delete => "- delete ",
        Change::Protect => "  protect",
        Change::Skip => "  skip   ",
    }
}

fn sections(plan: &SyncPlan) -> [(Change, &[ItemIdentity]); 6] {
    [
        (Change::Create, plan.creates.as_slice()),
        (Change::Update, plan.updates.as_slice()),
        (Change::Keep, plan.unchanged.as_slice()),
        (Change::Delete, plan.deletes.as_slice()),
        (Change::Protect, plan.protected.as_slice()),
        (Change::Skip, plan.skipped.as_slice()),
    ]
}
