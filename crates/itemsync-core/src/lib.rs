//! # itemsync-core
//!
//! Item synchronization and reference-redirection engine for analytics
//! workspaces.
//!
//! This crate reconciles a declaratively described item set (lakehouses,
//! notebooks, semantic models, reports) against a live target workspace:
//!
//! - **Item Model**: item definitions made of base64-encoded parts
//! - **Loader**: tracked file listings to item definitions and back
//! - **Redirection**: run-scoped mapping of source identifiers to target identifiers
//! - **Rewriting**: literal reference substitution and report rebinding
//! - **Engine**: ordered create/update passes followed by orphan deletion
//!
//! ## Crate Boundary
//!
//! No network code lives here. The remote platform is reached through the
//! [`service::ItemService`] trait; [`memory::MemoryItemService`] implements
//! it in memory.
//!
//! ## Example
//!
//! ```rust
//! use itemsync_core::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let service = MemoryItemService::new();
//! let desired = vec![ItemDefinition::new("Sales", ItemKind::Lakehouse)];
//!
//! let engine = SyncEngine::new(service.clone());
//! let report = engine.sync(desired, &SyncTarget::new("ws-1")).await.unwrap();
//! assert_eq!(report.count(SyncAction::Created), 1);
//! # });
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod export;
pub mod item;
pub mod loader;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod redirect;
pub mod report;
pub mod rewrite;
pub mod service;
pub mod source;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use itemsync_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::engine::{SyncEngine, SyncOptions, SyncTarget};
    pub use crate::error::{Error, Result};
    pub use crate::export::export_item_set;
    pub use crate::item::{
        DefinitionPart, ItemDefinition, ItemIdentity, ItemKind, PayloadType, WorkspaceItem,
    };
    pub use crate::loader::load_item_set;
    pub use crate::memory::{MemoryItemService, ServiceCall};
    pub use crate::plan::{SyncPass, SyncPlan, plan_sync};
    pub use crate::redirect::RedirectionTable;
    pub use crate::report::{ItemOutcome, SyncAction, SyncReport, SyncRunId};
    pub use crate::rewrite::{ModelDirectory, rebind_report, rewrite_part};
    pub use crate::service::{ConnectionSpec, ItemService, StorageEndpoint};
    pub use crate::source::{TrackedFile, TrackedFileSource};
}
