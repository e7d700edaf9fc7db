//! Item set loader.
//!
//! Turns a flat listing of tracked files into item definitions. Each item
//! folder starts with a `.platform` sentinel naming the item; every following
//! file up to the next sentinel becomes a part of that item.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::item::{DefinitionPart, ItemDefinition, ItemIdentity, ItemKind, PLATFORM_FILE};
use crate::source::TrackedFile;

const PLATFORM_SCHEMA: &str = "https://developer.microsoft.com/json-schemas/fabric/gitIntegration/platformProperties/2.0.0/schema.json";
const PLATFORM_CONFIG_VERSION: &str = "2.0";

/// Decoded `.platform` sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformFile {
    /// JSON schema reference.
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Item name and kind.
    pub metadata: PlatformMetadata,
    /// Source-control configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PlatformConfig>,
}

/// The `metadata` block of a sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMetadata {
    /// Item kind.
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Item display name.
    pub display_name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The `config` block of a sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    /// Sentinel format version.
    pub version: String,
    /// Logical identifier of the item across workspaces.
    pub logical_id: String,
}

impl PlatformFile {
    /// Builds a sentinel for `identity` with a fresh logical identifier.
    #[must_use]
    pub fn for_identity(identity: &ItemIdentity) -> Self {
        Self {
            schema: Some(PLATFORM_SCHEMA.to_string()),
            metadata: PlatformMetadata {
                kind: identity.kind.clone(),
                display_name: identity.display_name.clone(),
                description: None,
            },
            config: Some(PlatformConfig {
                version: PLATFORM_CONFIG_VERSION.to_string(),
                logical_id: logical_id(ulid::Ulid::new()),
            }),
        }
    }

    /// Parses a sentinel file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the file is not a valid sentinel.
    pub fn parse(file: &TrackedFile) -> Result<Self> {
        serde_json::from_slice(&file.content).map_err(|e| {
            Error::serialization(format!("invalid sentinel '{}': {e}", file.full_path))
        })
    }

    /// Returns the identity declared by the sentinel.
    #[must_use]
    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity::new(self.metadata.display_name.clone(), self.metadata.kind.clone())
    }
}

/// Formats a ULID as a GUID-shaped string.
fn logical_id(id: ulid::Ulid) -> String {
    let hex = format!("{:032x}", u128::from(id));
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Loads item definitions from a tracked file listing, in file-arrival order.
///
/// # Errors
///
/// - `Error::MalformedItemSet` if a content file arrives before any sentinel,
///   or two sentinels declare the same identity
/// - `Error::Serialization` if a sentinel is not valid JSON
pub fn load_item_set(files: &[TrackedFile]) -> Result<Vec<ItemDefinition>> {
    let mut items: Vec<ItemDefinition> = Vec::new();
    let mut seen: HashSet<ItemIdentity> = HashSet::new();

    for file in files {
        if file.file_name() == PLATFORM_FILE {
            let sentinel = PlatformFile::parse(file)?;
            let identity = sentinel.identity();
            if !seen.insert(identity.clone()) {
                return Err(Error::malformed(format!(
                    "item '{identity}' is declared more than once (again in '{}')",
                    file.full_path
                )));
            }
            tracing::debug!(item = %identity, folder = file.item_folder(), "loaded sentinel");
            items.push(ItemDefinition::new(identity.display_name, identity.kind));
            continue;
        }

        let Some(current) = items.last_mut() else {
            return Err(Error::malformed(format!(
                "content file '{}' appears before any {PLATFORM_FILE} file",
                file.full_path
            )));
        };
        current
            .parts
            .push(DefinitionPart::from_bytes(file.path(), &file.content));
    }

    tracing::info!(items = items.len(), files = files.len(), "loaded item set");
    Ok(items)
}

/// Lays out definitions as tracked files, the inverse of [`load_item_set`].
///
/// Each item becomes a `<display name>.<kind>/` folder with a generated
/// sentinel first, then one file per part. Parts named like the sentinel are
/// dropped in favour of the generated one.
///
/// # Errors
///
/// Returns `Error::Serialization` if a payload cannot be decoded.
pub fn to_tracked_files(items: &[ItemDefinition]) -> Result<Vec<TrackedFile>> {
    let mut files = Vec::new();
    for item in items {
        let identity = item.identity();
        let sentinel = serde_json::to_vec_pretty(&PlatformFile::for_identity(&identity))
            .map_err(|e| Error::serialization(e.to_string()))?;
        files.push(TrackedFile::new(format!("{identity}/{PLATFORM_FILE}"), sentinel));

        for part in item.parts.iter().filter(|p| p.path != PLATFORM_FILE) {
            files.push(TrackedFile::new(
                format!("{identity}/{}", part.path),
                part.decode_bytes()?,
            ));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel(folder: &str, kind: &str, name: &str) -> TrackedFile {
        TrackedFile::new(
            format!("{folder}/.platform"),
            format!(
                r#"{{"metadata":{{"type":"{kind}","displayName":"{name}"}},"config":{{"version":"2.0","logicalId":"00000000-0000-0000-0000-000000000000"}}}}"#
            ),
        )
    }

    #[test]
    fn groups_files_under_preceding_sentinel() {
        let files = vec![
            sentinel("Sales.Lakehouse", "Lakehouse", "Sales"),
            sentinel("Load.Notebook", "Notebook", "Load"),
            TrackedFile::new("Load.Notebook/notebook-content.py", "print(1)"),
            sentinel("Sales Model.SemanticModel", "SemanticModel", "Sales Model"),
            TrackedFile::new("Sales Model.SemanticModel/definition/expressions.tmdl", "expr"),
            TrackedFile::new("Sales Model.SemanticModel/definition.pbism", "{}"),
        ];

        let items = load_item_set(&files).unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].kind, ItemKind::Lakehouse);
        assert!(items[0].parts.is_empty());
        assert_eq!(items[1].display_name, "Load");
        assert_eq!(items[1].parts[0].path, "notebook-content.py");
        assert_eq!(items[1].parts[0].decode_text().unwrap(), "print(1)");
        let paths: Vec<_> = items[2].parts.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths, ["definition/expressions.tmdl", "definition.pbism"]);
    }

    #[test]
    fn content_before_sentinel_is_malformed() {
        let files = vec![TrackedFile::new("Load.Notebook/notebook-content.py", "x")];
        let err = load_item_set(&files).unwrap_err();
        assert!(matches!(err, Error::MalformedItemSet { .. }));
    }

    #[test]
    fn duplicate_identity_is_malformed() {
        let files = vec![
            sentinel("A.Notebook", "Notebook", "A"),
            sentinel("A copy.Notebook", "Notebook", "A"),
        ];
        let err = load_item_set(&files).unwrap_err();
        assert!(matches!(err, Error::MalformedItemSet { .. }));
    }

    #[test]
    fn same_name_different_kind_is_allowed() {
        let files = vec![
            sentinel("Sales.Lakehouse", "Lakehouse", "Sales"),
            sentinel("Sales.SemanticModel", "SemanticModel", "Sales"),
        ];
        assert_eq!(load_item_set(&files).unwrap().len(), 2);
    }

    #[test]
    fn sentinel_without_config_is_accepted() {
        let files = vec![TrackedFile::new(
            "X.Report/.platform",
            r#"{"metadata":{"type":"Report","displayName":"X"}}"#,
        )];
        let items = load_item_set(&files).unwrap();
        assert_eq!(items[0].kind, ItemKind::Report);
    }

    #[test]
    fn invalid_sentinel_is_serialization_error() {
        let files = vec![TrackedFile::new("X.Report/.platform", "not json")];
        assert!(matches!(
            load_item_set(&files),
            Err(Error::Serialization { .. })
        ));
    }

    #[test]
    fn empty_listing_loads_nothing() {
        assert!(load_item_set(&[]).unwrap().is_empty());
    }

    #[test]
    fn tracked_files_reload_to_same_definitions() {
        let items = vec![
            ItemDefinition::new("Load", ItemKind::Notebook)
                .with_part(DefinitionPart::from_text("notebook-content.py", "print(1)")),
            ItemDefinition::new("Sales", ItemKind::Lakehouse),
        ];

        let files = to_tracked_files(&items).unwrap();
        assert_eq!(files[0].full_path, "Load.Notebook/.platform");
        assert_eq!(files[1].full_path, "Load.Notebook/notebook-content.py");

        assert_eq!(load_item_set(&files).unwrap(), items);
    }

    #[test]
    fn logical_id_is_guid_shaped() {
        let id = logical_id(ulid::Ulid::new());
        let groups: Vec<_> = id.split('-').map(str::len).collect();
        assert_eq!(groups, [8, 4, 4, 4, 12]);
    }
}
