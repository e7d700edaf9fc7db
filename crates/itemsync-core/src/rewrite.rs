//! Payload rewriting.
//!
//! Two strategies live here:
//!
//! - [`rewrite_part`] substitutes identifier references inside a text part
//!   using the run's [`RedirectionTable`].
//! - [`rebind_report`] rebuilds a report's model binding by resolving the
//!   referenced model's display name against the target workspace's live
//!   model directory. The binding names the model by path, not by
//!   identifier, so the redirection table does not apply.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::item::{
    DefinitionPart, ItemDefinition, ItemKind, REPORT_BINDING_PART, WorkspaceItem,
};
use crate::redirect::RedirectionTable;

/// Folder suffixes stripped from a by-path binding to recover the model name.
const MODEL_FOLDER_SUFFIXES: [&str; 2] = [".SemanticModel", ".Model"];

/// Format version written into rebuilt by-connection bindings.
const BY_CONNECTION_VERSION: &str = "1.0";

/// Rewrites the part at `part_path` by applying `table` to its decoded text.
///
/// Other parts are untouched. When no substitution changes the text the
/// original payload is kept as-is.
///
/// # Errors
///
/// Returns `Error::PartNotFound` if the part is absent and
/// `Error::Serialization` if its payload is not base64-encoded UTF-8.
pub fn rewrite_part(
    mut definition: ItemDefinition,
    part_path: &str,
    table: &RedirectionTable,
) -> Result<ItemDefinition> {
    let part = definition.require_part(part_path)?;
    let text = part.decode_text()?;
    let rewritten = table.apply(&text);

    if rewritten != text {
        tracing::debug!(
            item = %definition.identity(),
            part = part_path,
            "rewrote part references"
        );
        definition.replace_part(DefinitionPart::from_text(part_path, &rewritten))?;
    }

    Ok(definition)
}

/// Structured content of a report's model-binding part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportBindingFile {
    /// Binding format version.
    pub version: String,
    /// The model reference.
    pub dataset_reference: DatasetReference,
}

/// Model reference of a report: by path to a sibling folder, or by connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReference {
    /// Reference to a sibling model folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_path: Option<ByPathReference>,
    /// Reference to a live model connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_connection: Option<ByConnectionReference>,
}

/// By-path model reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByPathReference {
    /// Relative path to the model folder.
    pub path: String,
}

/// By-connection model reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByConnectionReference {
    /// Connection string, unused for service-hosted models.
    pub connection_string: Option<String>,
    /// Service model identifier, unused for service-hosted models.
    pub pbi_service_model_id: Option<serde_json::Value>,
    /// Virtual server name.
    pub pbi_model_virtual_server_name: Option<String>,
    /// Target model identifier.
    pub pbi_model_database_name: Option<String>,
    /// Data source name.
    pub name: Option<String>,
    /// Connection type.
    pub connection_type: Option<String>,
}

impl ReportBindingFile {
    /// Builds the by-connection binding that points a report at `model_id`.
    #[must_use]
    pub fn by_connection(model_id: &str) -> Self {
        Self {
            version: BY_CONNECTION_VERSION.to_string(),
            dataset_reference: DatasetReference {
                by_path: None,
                by_connection: Some(ByConnectionReference {
                    connection_string: None,
                    pbi_service_model_id: None,
                    pbi_model_virtual_server_name: Some("sobe_wowvirtualserver".to_string()),
                    pbi_model_database_name: Some(model_id.to_string()),
                    name: Some("EntityDataSource".to_string()),
                    connection_type: Some("pbiServiceXmlaStyleLive".to_string()),
                }),
            },
        }
    }

    /// Returns the by-path reference if one with a non-empty path is present.
    #[must_use]
    pub fn by_path(&self) -> Option<&str> {
        self.dataset_reference
            .by_path
            .as_ref()
            .map(|r| r.path.as_str())
            .filter(|p| !p.is_empty())
    }
}

/// Directory of semantic models in the target workspace, keyed by display name.
#[derive(Debug, Clone, Default)]
pub struct ModelDirectory {
    by_name: HashMap<String, String>,
}

impl ModelDirectory {
    /// Builds the directory from a live workspace listing.
    ///
    /// Items of other kinds are ignored.
    #[must_use]
    pub fn from_items(items: &[WorkspaceItem]) -> Self {
        let by_name = items
            .iter()
            .filter(|i| i.kind == ItemKind::SemanticModel)
            .map(|i| (i.display_name.clone(), i.id.clone()))
            .collect();
        Self { by_name }
    }

    /// Returns the identifier of the model called `name`.
    #[must_use]
    pub fn resolve_by_display_name(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    /// Returns the number of models in the directory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns true if the directory holds no models.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Derives a model display name from a by-path binding such as `../Sales.SemanticModel`.
#[must_use]
pub fn model_name_from_binding_path(path: &str) -> String {
    let folder = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    MODEL_FOLDER_SUFFIXES
        .iter()
        .find_map(|suffix| folder.strip_suffix(suffix))
        .unwrap_or(folder)
        .to_string()
}

/// Rewrites a report's binding part to reference its model in the target workspace.
///
/// # Errors
///
/// - `Error::PartNotFound` if the report has no binding part
/// - `Error::Serialization` if the binding is not valid JSON
/// - `Error::UnsupportedBindingKind` if the binding is not a by-path reference
/// - `Error::BindingTargetNotFound` if the model is absent from `directory`
pub fn rebind_report(
    mut definition: ItemDefinition,
    directory: &ModelDirectory,
) -> Result<ItemDefinition> {
    let text = definition.require_part(REPORT_BINDING_PART)?.decode_text()?;
    let binding: ReportBindingFile = serde_json::from_str(&text).map_err(|e| {
        Error::serialization(format!(
            "binding of report '{}' is not valid JSON: {e}",
            definition.display_name
        ))
    })?;

    let Some(path) = binding.by_path() else {
        let message = if binding.dataset_reference.by_connection.is_some() {
            "by-connection bindings cannot be redirected"
        } else {
            "binding has no model reference"
        };
        return Err(Error::UnsupportedBindingKind {
            report: definition.display_name.clone(),
            message: message.to_string(),
        });
    };

    let model_name = model_name_from_binding_path(path);
    let model_id = directory
        .resolve_by_display_name(&model_name)
        .ok_or_else(|| Error::BindingTargetNotFound {
            report: definition.display_name.clone(),
            model: model_name.clone(),
        })?;

    tracing::debug!(
        report = %definition.display_name,
        model = %model_name,
        model_id,
        "rebinding report to target model"
    );

    let content = serde_json::to_string_pretty(&ReportBindingFile::by_connection(model_id))
        .map_err(|e| Error::serialization(e.to_string()))?;
    definition.replace_part(DefinitionPart::from_text(REPORT_BINDING_PART, &content))?;
    Ok(definition)
}
