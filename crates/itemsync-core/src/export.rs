//! Export of a live workspace as a tracked file listing.

use crate::error::Result;
use crate::item::{ItemDefinition, ItemKind};
use crate::loader::to_tracked_files;
use crate::service::ItemService;
use crate::source::TrackedFile;

/// Definition format requested for semantic models.
pub const MODEL_FORMAT_HINT: &str = "TMDL";

fn format_hint(kind: &ItemKind) -> Option<&'static str> {
    match kind {
        ItemKind::SemanticModel => Some(MODEL_FORMAT_HINT),
        _ => None,
    }
}

/// Reads every exportable item of a workspace as item definitions.
///
/// Derived items are skipped.
///
/// # Errors
///
/// Returns the first remote error.
pub async fn export_definitions<S: ItemService + ?Sized>(
    service: &S,
    workspace_id: &str,
) -> Result<Vec<ItemDefinition>> {
    let mut definitions = Vec::new();
    for item in service.list_items(workspace_id).await? {
        if item.kind.is_derived() {
            tracing::debug!(item = %item.identity(), "skipping derived item");
            continue;
        }
        let parts = service
            .get_item_definition(workspace_id, &item.id, format_hint(&item.kind))
            .await?;
        tracing::info!(item = %item.identity(), parts = parts.len(), "exported item");
        definitions.push(ItemDefinition {
            display_name: item.display_name,
            kind: item.kind,
            parts,
        });
    }
    Ok(definitions)
}

/// Exports a workspace as item folders that [`load_item_set`](crate::loader::load_item_set)
/// can read back.
///
/// # Errors
///
/// Returns the first remote error, or `Error::Serialization` for an
/// undecodable payload.
pub async fn export_item_set<S: ItemService + ?Sized>(
    service: &S,
    workspace_id: &str,
) -> Result<Vec<TrackedFile>> {
    let definitions = export_definitions(service, workspace_id).await?;
    to_tracked_files(&definitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::DefinitionPart;
    use crate::loader::load_item_set;
    use crate::memory::{MemoryItemService, ServiceCall};

    #[tokio::test]
    async fn export_skips_endpoints_and_requests_tmdl() {
        let service = MemoryItemService::new();
        service
            .seed_item("ws", "Sales", ItemKind::Lakehouse, Vec::new())
            .unwrap();
        service
            .seed_item(
                "ws",
                "Sales Model",
                ItemKind::SemanticModel,
                vec![DefinitionPart::from_text("definition/expressions.tmdl", "expr")],
            )
            .unwrap();

        let files = export_item_set(&service, "ws").await.unwrap();

        assert!(files.iter().all(|f| !f.full_path.contains("SQLEndpoint")));
        assert!(
            files
                .iter()
                .any(|f| f.full_path == "Sales Model.SemanticModel/definition/expressions.tmdl")
        );
        let hints: Vec<_> = service
            .calls()
            .unwrap()
            .into_iter()
            .filter_map(|c| match c {
                ServiceCall::GetItemDefinition { format_hint, .. } => Some(format_hint),
                _ => None,
            })
            .collect();
        assert!(hints.contains(&Some("TMDL".to_string())));

        let reloaded = load_item_set(&files).unwrap();
        // Lakehouse, its implicit model, and the explicit model.
        assert_eq!(reloaded.len(), 3);
    }
}
