//! # itemsync-cli
//!
//! Command-line interface for synchronizing analytics workspace items.
//!
//! ## Commands
//!
//! - `itemsync deploy` - Reconcile a project's items into a target workspace
//! - `itemsync plan` - Show what a deploy would change
//! - `itemsync items` - List items in a workspace
//! - `itemsync workspaces` - List workspaces
//! - `itemsync export` - Write a workspace's items as project folders
//!
//! ## Configuration
//!
//! The CLI uses environment variables or command-line flags for settings:
//!
//! - `ITEMSYNC_API_URL` - Platform API endpoint (default: `https://api.fabric.microsoft.com/v1`)
//! - `ITEMSYNC_BI_API_URL` - BI API endpoint (default: `https://api.powerbi.com/v1.0/myorg`)
//! - `ITEMSYNC_API_TOKEN` - Bearer token for both APIs
//! - `ITEMSYNC_SP_TENANT_ID`, `ITEMSYNC_SP_CLIENT_ID`, `ITEMSYNC_SP_CLIENT_SECRET` -
//!   Service principal used for model data connections

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod client;
pub mod commands;
pub mod source;

use clap::{Parser, Subcommand};

/// Default platform API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.fabric.microsoft.com/v1";

/// Default BI API endpoint.
pub const DEFAULT_BI_API_URL: &str = "https://api.powerbi.com/v1.0/myorg";

/// itemsync - Analytics workspace item synchronization.
#[derive(Debug, Parser)]
#[command(name = "itemsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Platform API URL.
    #[arg(long, env = "ITEMSYNC_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// BI API URL (connection binding and model refresh).
    #[arg(long, env = "ITEMSYNC_BI_API_URL", default_value = DEFAULT_BI_API_URL)]
    pub bi_api_url: String,

    /// API bearer token.
    #[arg(long, env = "ITEMSYNC_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Service principal tenant ID for data connections.
    #[arg(long, env = "ITEMSYNC_SP_TENANT_ID")]
    pub sp_tenant_id: Option<String>,

    /// Service principal client ID for data connections.
    #[arg(long, env = "ITEMSYNC_SP_CLIENT_ID")]
    pub sp_client_id: Option<String>,

    /// Service principal client secret for data connections.
    #[arg(long, env = "ITEMSYNC_SP_CLIENT_SECRET", hide_env_values = true)]
    pub sp_client_secret: Option<String>,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Log progress at info level.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        let service_principal = match (&self.sp_tenant_id, &self.sp_client_id, &self.sp_client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Some(ServicePrincipal {
                tenant_id: tenant_id.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            }),
            _ => None,
        };

        Config {
            api_url: self.api_url.trim_end_matches('/').to_string(),
            bi_api_url: self.bi_api_url.trim_end_matches('/').to_string(),
            api_token: self.api_token.clone(),
            service_principal,
            format: self.format.clone(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile a project's items into a target workspace.
    Deploy(commands::deploy::DeployArgs),
    /// Show what a deploy would change.
    Plan(commands::plan::PlanArgs),
    /// List items in a workspace.
    Items(commands::items::ItemsArgs),
    /// List workspaces.
    Workspaces,
    /// Write a workspace's items as project folders.
    Export(commands::export::ExportArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// Service principal credentials for data connections.
#[derive(Clone)]
pub struct ServicePrincipal {
    /// Directory tenant.
    pub tenant_id: String,
    /// Application (client) ID.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl std::fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Platform API URL, without trailing slash.
    pub api_url: String,
    /// BI API URL, without trailing slash.
    pub bi_api_url: String,
    /// API bearer token.
    pub api_token: Option<String>,
    /// Credentials for data connections, when all three parts are set.
    pub service_principal: Option<ServicePrincipal>,
    /// Output format.
    pub format: OutputFormat,
}
