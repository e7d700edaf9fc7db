//! Item definition model.
//!
//! An item is one unit of workspace content. Its definition is an ordered list
//! of parts, each holding an inline base64 payload and a path that identifies
//! the part's role within the item.
//!
//! Identity for matching purposes is `(display_name, kind)`, rendered as
//! `"{display_name}.{kind}"`, which is also the item-folder naming convention
//! used by source control.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the per-item sentinel metadata file.
pub const PLATFORM_FILE: &str = ".platform";

/// Part holding executable notebook code.
pub const NOTEBOOK_CONTENT_PART: &str = "notebook-content.py";

/// Part holding a semantic model's connection expressions.
pub const MODEL_EXPRESSIONS_PART: &str = "definition/expressions.tmdl";

/// Part holding a report's model binding.
pub const REPORT_BINDING_PART: &str = "definition.pbir";

/// Kind of a workspace item.
///
/// Wire names are the platform's type strings. Unknown kinds are carried as
/// [`ItemKind::Other`] and passed through untouched by every pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemKind {
    /// Data-lake storage unit.
    Lakehouse,
    /// Compute notebook.
    Notebook,
    /// Semantic data model.
    SemanticModel,
    /// Report bound to a semantic model.
    Report,
    /// Endpoint object the platform derives from a lakehouse.
    SqlEndpoint,
    /// Any other platform kind.
    Other(String),
}

impl ItemKind {
    /// Returns the platform type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Lakehouse => "Lakehouse",
            Self::Notebook => "Notebook",
            Self::SemanticModel => "SemanticModel",
            Self::Report => "Report",
            Self::SqlEndpoint => "SQLEndpoint",
            Self::Other(kind) => kind,
        }
    }

    /// Returns true for kinds the platform creates as a side effect of another item.
    #[must_use]
    pub fn is_derived(&self) -> bool {
        matches!(self, Self::SqlEndpoint)
    }

    /// Returns the part rewritten with the redirection table for this kind, if any.
    #[must_use]
    pub fn redirected_part(&self) -> Option<&'static str> {
        match self {
            Self::Notebook => Some(NOTEBOOK_CONTENT_PART),
            Self::SemanticModel => Some(MODEL_EXPRESSIONS_PART),
            _ => None,
        }
    }
}

impl From<&str> for ItemKind {
    fn from(value: &str) -> Self {
        match value {
            "Lakehouse" => Self::Lakehouse,
            "Notebook" => Self::Notebook,
            "SemanticModel" => Self::SemanticModel,
            "Report" => Self::Report,
            "SQLEndpoint" => Self::SqlEndpoint,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for ItemKind {
    fn from(value: String) -> Self {
        match Self::from(value.as_str()) {
            Self::Other(_) => Self::Other(value),
            known => known,
        }
    }
}

impl From<ItemKind> for String {
    fn from(value: ItemKind) -> Self {
        match value {
            ItemKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Matching identity of an item: `(display_name, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemIdentity {
    /// Display name.
    pub display_name: String,
    /// Item kind.
    pub kind: ItemKind,
}

impl ItemIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(display_name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            display_name: display_name.into(),
            kind,
        }
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.display_name, self.kind)
    }
}

/// Payload encoding of a definition part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadType {
    /// Inline standard base64.
    #[default]
    InlineBase64,
}

/// One named, separately encoded unit inside a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionPart {
    /// Relative logical path within the item.
    pub path: String,
    /// Encoded payload.
    pub payload: String,
    /// Payload encoding.
    #[serde(default)]
    pub payload_type: PayloadType,
}

impl DefinitionPart {
    /// Creates an inline base64 part from raw bytes.
    #[must_use]
    pub fn from_bytes(path: impl Into<String>, content: &[u8]) -> Self {
        Self {
            path: path.into(),
            payload: STANDARD.encode(content),
            payload_type: PayloadType::InlineBase64,
        }
    }

    /// Creates an inline base64 part from text.
    #[must_use]
    pub fn from_text(path: impl Into<String>, content: &str) -> Self {
        Self::from_bytes(path, content.as_bytes())
    }

    /// Decodes the payload to raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the payload is not valid base64.
    pub fn decode_bytes(&self) -> Result<Vec<u8>> {
        match self.payload_type {
            PayloadType::InlineBase64 => STANDARD.decode(self.payload.as_bytes()).map_err(|e| {
                Error::serialization(format!("part '{}' is not valid base64: {e}", self.path))
            }),
        }
    }

    /// Decodes the payload to UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the payload is not valid base64 or UTF-8.
    pub fn decode_text(&self) -> Result<String> {
        String::from_utf8(self.decode_bytes()?).map_err(|e| {
            Error::serialization(format!("part '{}' is not valid UTF-8: {e}", self.path))
        })
    }
}

/// Full definition of an item: display name, kind, and ordered parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDefinition {
    /// Display name.
    pub display_name: String,
    /// Item kind.
    pub kind: ItemKind,
    /// Ordered definition parts.
    pub parts: Vec<DefinitionPart>,
}

impl ItemDefinition {
    /// Creates a definition with no parts.
    #[must_use]
    pub fn new(display_name: impl Into<String>, kind: ItemKind) -> Self {
        Self {
            display_name: display_name.into(),
            kind,
            parts: Vec::new(),
        }
    }

    /// Adds a part (builder style).
    #[must_use]
    pub fn with_part(mut self, part: DefinitionPart) -> Self {
        self.parts.push(part);
        self
    }

    /// Returns the matching identity of this item.
    #[must_use]
    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity::new(self.display_name.clone(), self.kind.clone())
    }

    /// Returns the part at `path`, if present.
    #[must_use]
    pub fn part(&self, path: &str) -> Option<&DefinitionPart> {
        self.parts.iter().find(|p| p.path == path)
    }

    /// Returns the part at `path`, or `Error::PartNotFound`.
    ///
    /// # Errors
    ///
    /// Returns `Error::PartNotFound` if the definition has no such part.
    pub fn require_part(&self, path: &str) -> Result<&DefinitionPart> {
        self.part(path).ok_or_else(|| Error::PartNotFound {
            item: self.identity().to_string(),
            part: path.to_string(),
        })
    }

    /// Replaces the part with the same path in place, keeping part order.
    ///
    /// # Errors
    ///
    /// Returns `Error::PartNotFound` if the definition has no part at `part.path`.
    pub fn replace_part(&mut self, part: DefinitionPart) -> Result<()> {
        let identity = self.identity();
        let slot = self
            .parts
            .iter_mut()
            .find(|p| p.path == part.path)
            .ok_or_else(|| Error::PartNotFound {
                item: identity.to_string(),
                part: part.path.clone(),
            })?;
        *slot = part;
        Ok(())
    }
}

/// An item as it exists in a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceItem {
    /// Platform identifier.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Item kind.
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

impl WorkspaceItem {
    /// Returns the matching identity of this item.
    #[must_use]
    pub fn identity(&self) -> ItemIdentity {
        ItemIdentity::new(self.display_name.clone(), self.kind.clone())
    }

    /// Returns true if this item has the given identity.
    #[must_use]
    pub fn matches(&self, identity: &ItemIdentity) -> bool {
        self.kind == identity.kind && self.display_name == identity.display_name
    }
}
