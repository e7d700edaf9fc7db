//! Pass ordering, implicit-model ownership, and dry-run planning.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::item::{ItemDefinition, ItemIdentity, ItemKind, WorkspaceItem};

/// One stage of a reconciliation run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPass {
    /// Lakehouses and their endpoints.
    Storage,
    /// Notebooks.
    Notebook,
    /// Semantic models, excluding implicit ones.
    Model,
    /// Reports.
    Report,
    /// Deletion of target items absent from the desired set.
    Orphans,
}

impl SyncPass {
    /// Item passes in dependency order. Orphan deletion always runs last.
    pub const ITEM_PASSES: [Self; 4] = [Self::Storage, Self::Notebook, Self::Model, Self::Report];

    /// Returns the item kind handled by this pass.
    #[must_use]
    pub fn kind(self) -> Option<ItemKind> {
        match self {
            Self::Storage => Some(ItemKind::Lakehouse),
            Self::Notebook => Some(ItemKind::Notebook),
            Self::Model => Some(ItemKind::SemanticModel),
            Self::Report => Some(ItemKind::Report),
            Self::Orphans => None,
        }
    }

    /// Returns the pass name used in spans and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Notebook => "notebook",
            Self::Model => "model",
            Self::Report => "report",
            Self::Orphans => "orphans",
        }
    }
}

impl fmt::Display for SyncPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A semantic model the platform created as a side effect of a storage item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImplicitModelOf {
    /// Identity of the implicit model.
    pub model: ItemIdentity,
    /// Display name of the owning storage item.
    pub storage: String,
}

/// Implicit models of one run, resolved once and shared by every pass.
///
/// Two scopes are kept. The model pass skips only models named after a
/// storage item this run registers. Orphan deletion protects models named
/// after any storage item known to the run, including ones that exist only
/// in the target.
#[derive(Debug, Clone, Default)]
pub struct ImplicitModels {
    registered: HashMap<String, ImplicitModelOf>,
    known: HashSet<String>,
}

fn ownership(name: &str) -> (String, ImplicitModelOf) {
    (
        name.to_string(),
        ImplicitModelOf {
            model: ItemIdentity::new(name, ItemKind::SemanticModel),
            storage: name.to_string(),
        },
    )
}

impl ImplicitModels {
    /// Resolves implicit models from storage items registered by the run and
    /// storage items that exist only in the target.
    pub fn resolve<'a>(
        registered: impl IntoIterator<Item = &'a str>,
        target_only: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let registered: HashMap<_, _> = registered.into_iter().map(ownership).collect();
        let known = registered
            .keys()
            .cloned()
            .chain(target_only.into_iter().map(str::to_string))
            .collect();
        Self { registered, known }
    }

    /// Resolves implicit models from the desired set and a target snapshot.
    ///
    /// Every desired storage item is registered by the storage pass; target
    /// storage items only widen orphan protection.
    #[must_use]
    pub fn for_run(desired: &[ItemDefinition], target: &[WorkspaceItem]) -> Self {
        Self::resolve(
            desired
                .iter()
                .filter(|d| d.kind == ItemKind::Lakehouse)
                .map(|d| d.display_name.as_str()),
            target
                .iter()
                .filter(|t| t.kind == ItemKind::Lakehouse)
                .map(|t| t.display_name.as_str()),
        )
    }

    /// Returns the ownership record if `identity` is the implicit model of a
    /// storage item registered by this run.
    #[must_use]
    pub fn owner_of(&self, identity: &ItemIdentity) -> Option<&ImplicitModelOf> {
        if identity.kind != ItemKind::SemanticModel {
            return None;
        }
        self.registered.get(&identity.display_name)
    }

    /// Returns true if the model pass must skip `identity`.
    #[must_use]
    pub fn contains(&self, identity: &ItemIdentity) -> bool {
        self.owner_of(identity).is_some()
    }

    /// Returns true if a target item must never be deleted by the engine.
    #[must_use]
    pub fn protects(&self, item: &WorkspaceItem) -> bool {
        item.kind.is_derived()
            || (item.kind == ItemKind::SemanticModel && self.known.contains(&item.display_name))
    }
}

/// Target items split into deletable orphans and protected items.
#[derive(Debug, Clone, Default)]
pub struct OrphanSet<'a> {
    /// Items to delete.
    pub deletable: Vec<&'a WorkspaceItem>,
    /// Items absent from the desired set that must be kept.
    pub protected: Vec<&'a WorkspaceItem>,
}

impl<'a> OrphanSet<'a> {
    /// Classifies target items absent from `desired`.
    #[must_use]
    pub fn classify(
        target: &'a [WorkspaceItem],
        desired: &HashSet<ItemIdentity>,
        implicit: &ImplicitModels,
    ) -> Self {
        let mut set = Self::default();
        for item in target.iter().filter(|t| !desired.contains(&t.identity())) {
            if implicit.protects(item) {
                set.protected.push(item);
            } else {
                set.deletable.push(item);
            }
        }
        set
    }
}

/// Dry-run diff of a desired set against a target listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncPlan {
    /// Items that would be created.
    pub creates: Vec<ItemIdentity>,
    /// Items whose definition would be replaced.
    pub updates: Vec<ItemIdentity>,
    /// Existing storage items that would be reused as-is.
    pub unchanged: Vec<ItemIdentity>,
    /// Target items that would be deleted.
    pub deletes: Vec<ItemIdentity>,
    /// Target items kept although absent from the desired set.
    pub protected: Vec<ItemIdentity>,
    /// Desired items no pass manages (implicit models, other kinds).
    pub skipped: Vec<ItemIdentity>,
}

impl SyncPlan {
    /// Returns true if applying the plan would change nothing in the target.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Computes what a run would do, using the same matching and exclusion rules.
#[must_use]
pub fn plan_sync(desired: &[ItemDefinition], target: &[WorkspaceItem]) -> SyncPlan {
    let implicit = ImplicitModels::for_run(desired, target);
    let existing: HashSet<ItemIdentity> = target.iter().map(WorkspaceItem::identity).collect();
    let mut plan = SyncPlan::default();

    for pass in SyncPass::ITEM_PASSES {
        let Some(kind) = pass.kind() else { continue };
        for item in desired.iter().filter(|d| d.kind == kind) {
            let identity = item.identity();
            if implicit.contains(&identity) {
                plan.skipped.push(identity);
            } else if !existing.contains(&identity) {
                plan.creates.push(identity);
            } else if pass == SyncPass::Storage {
                plan.unchanged.push(identity);
            } else {
                plan.updates.push(identity);
            }
        }
    }

    plan.skipped.extend(
        desired
            .iter()
            .filter(|d| matches!(d.kind, ItemKind::Other(_) | ItemKind::SqlEndpoint))
            .map(ItemDefinition::identity),
    );

    let wanted: HashSet<ItemIdentity> = desired.iter().map(ItemDefinition::identity).collect();
    let orphans = OrphanSet::classify(target, &wanted, &implicit);
    plan.deletes = orphans.deletable.iter().map(|i| i.identity()).collect();
    plan.protected = orphans.protected.iter().map(|i| i.identity()).collect();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, name: &str, kind: ItemKind) -> WorkspaceItem {
        WorkspaceItem {
            id: id.into(),
            display_name: name.into(),
            kind,
        }
    }

    #[test]
    fn pass_order_is_fixed() {
        let kinds: Vec<_> = SyncPass::ITEM_PASSES.iter().filter_map(|p| p.kind()).collect();
        assert_eq!(
            kinds,
            [
                ItemKind::Lakehouse,
                ItemKind::Notebook,
                ItemKind::SemanticModel,
                ItemKind::Report
            ]
        );
    }

    #[test]
    fn implicit_models_only_match_semantic_models() {
        let implicit = ImplicitModels::resolve(["Sales"], []);
        assert!(implicit.contains(&ItemIdentity::new("Sales", ItemKind::SemanticModel)));
        assert!(!implicit.contains(&ItemIdentity::new("Sales", ItemKind::Report)));
        assert!(!implicit.contains(&ItemIdentity::new("Sales Model", ItemKind::SemanticModel)));
        assert_eq!(
            implicit
                .owner_of(&ItemIdentity::new("Sales", ItemKind::SemanticModel))
                .unwrap()
                .storage,
            "Sales"
        );
    }

    #[test]
    fn orphans_exclude_endpoints_and_implicit_models() {
        let items = vec![
            target("1", "Sales", ItemKind::Lakehouse),
            target("2", "Sales", ItemKind::SqlEndpoint),
            target("3", "Sales", ItemKind::SemanticModel),
            target("4", "Legacy Report", ItemKind::Report),
        ];
        let desired: HashSet<_> = [ItemIdentity::new("Sales", ItemKind::Lakehouse)].into();
        let implicit = ImplicitModels::resolve(["Sales"], []);

        let set = OrphanSet::classify(&items, &desired, &implicit);
        assert_eq!(set.deletable.len(), 1);
        assert_eq!(set.deletable[0].id, "4");
        assert_eq!(set.protected.len(), 2);
    }

    #[test]
    fn plan_against_empty_target_creates_everything() {
        let desired = vec![
            ItemDefinition::new("Sales Report", ItemKind::Report),
            ItemDefinition::new("Sales", ItemKind::Lakehouse),
            ItemDefinition::new("Sales Model", ItemKind::SemanticModel),
        ];
        let plan = plan_sync(&desired, &[]);
        let names: Vec<_> = plan.creates.iter().map(ToString::to_string).collect();
        assert_eq!(
            names,
            ["Sales.Lakehouse", "Sales Model.SemanticModel", "Sales Report.Report"]
        );
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn plan_classifies_existing_items() {
        let desired = vec![
            ItemDefinition::new("Sales", ItemKind::Lakehouse),
            ItemDefinition::new("Sales", ItemKind::SemanticModel),
            ItemDefinition::new("Load", ItemKind::Notebook),
            ItemDefinition::new("Pipe", ItemKind::Other("DataPipeline".into())),
        ];
        let items = vec![
            target("1", "Sales", ItemKind::Lakehouse),
            target("2", "Sales", ItemKind::SqlEndpoint),
            target("3", "Load", ItemKind::Notebook),
            target("4", "Old", ItemKind::Notebook),
        ];

        let plan = plan_sync(&desired, &items);
        assert_eq!(plan.unchanged, [ItemIdentity::new("Sales", ItemKind::Lakehouse)]);
        assert_eq!(plan.updates, [ItemIdentity::new("Load", ItemKind::Notebook)]);
        assert_eq!(plan.deletes, [ItemIdentity::new("Old", ItemKind::Notebook)]);
        assert_eq!(plan.protected, [ItemIdentity::new("Sales", ItemKind::SqlEndpoint)]);
        assert_eq!(plan.skipped.len(), 2);
        assert!(!plan.is_empty());
    }

    #[test]
    fn target_only_storage_protects_but_does_not_skip() {
        let implicit = ImplicitModels::resolve(["Sales"], ["Old"]);
        let old_model = ItemIdentity::new("Old", ItemKind::SemanticModel);
        assert!(!implicit.contains(&old_model));
        assert!(implicit.protects(&target("9", "Old", ItemKind::SemanticModel)));
        assert!(!implicit.protects(&target("8", "Old", ItemKind::Report)));
    }

    #[test]
    fn explicit_model_named_after_target_only_storage_is_created() {
        let desired = vec![ItemDefinition::new("Old", ItemKind::SemanticModel)];
        let items = vec![target("1", "Old", ItemKind::Lakehouse)];

        let plan = plan_sync(&desired, &items);
        assert_eq!(plan.creates, [ItemIdentity::new("Old", ItemKind::SemanticModel)]);
        assert!(plan.skipped.is_empty());
        assert_eq!(plan.deletes, [ItemIdentity::new("Old", ItemKind::Lakehouse)]);
    }

    #[test]
    fn plan_without_changes_is_empty() {
        let desired = vec![ItemDefinition::new("Sales", ItemKind::Lakehouse)];
        let items = vec![
            target("1", "Sales", ItemKind::Lakehouse),
            target("2", "Sales", ItemKind::SqlEndpoint),
        ];
        assert!(plan_sync(&desired, &items).is_empty());

        let notebooks = vec![ItemDefinition::new("Load", ItemKind::Notebook)];
        let existing = vec![target("3", "Load", ItemKind::Notebook)];
        assert!(!plan_sync(&notebooks, &existing).is_empty());
    }
}
