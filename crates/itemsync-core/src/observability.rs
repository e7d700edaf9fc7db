//! Logging initialization and span helpers.
//!
//! Progress of a run is reported as structured `tracing` events; every remote
//! call made inside a pass is attributed to that pass's span.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::plan::SyncPass;
use crate::report::SyncRunId;

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs.
    Json,
    /// Pretty-printed logs.
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `itemsync_core=debug`)
///
/// # Example
///
/// ```rust
/// use itemsync_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates the span covering one reconciliation run.
#[must_use]
pub fn sync_span(operation: &str, run_id: SyncRunId, workspace: &str) -> Span {
    tracing::info_span!(
        "sync",
        op = operation,
        run_id = %run_id,
        workspace = workspace,
    )
}

/// Creates the span covering one pass of a run.
#[must_use]
pub fn pass_span(pass: SyncPass, workspace: &str) -> Span {
    tracing::info_span!("pass", pass = pass.as_str(), workspace = workspace)
}
