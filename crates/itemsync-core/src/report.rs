//! Run identifiers and reconciliation reports.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::item::ItemIdentity;

// ============================================================================
// Run identifier
// ============================================================================

/// Identifier of one reconciliation run.
///
/// ULID-based, so run identifiers sort by start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncRunId(Ulid);

impl SyncRunId {
    /// Generates a new run ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        i64::try_from(self.0.timestamp_ms())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now)
    }
}

impl fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncRunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("invalid run ID '{s}': {e}")))
    }
}

// ============================================================================
// Report
// ============================================================================

/// What a run did to one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Item was created in the target.
    Created,
    /// Item definition was replaced.
    Updated,
    /// Existing item was reused without changes.
    Unchanged,
    /// Orphan was deleted.
    Deleted,
    /// Orphan deletion failed; the run continued.
    DeleteFailed,
    /// Item is not managed by any pass.
    Skipped,
}

impl SyncAction {
    /// Returns the action name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Deleted => "deleted",
            Self::DeleteFailed => "delete_failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    /// Item the outcome is about.
    pub item: ItemIdentity,
    /// Action taken.
    pub action: SyncAction,
    /// Target item identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    /// Additional detail, such as a failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ItemOutcome {
    /// Creates an outcome.
    #[must_use]
    pub fn new(item: ItemIdentity, action: SyncAction, item_id: Option<String>) -> Self {
        Self {
            item,
            action,
            item_id,
            detail: None,
        }
    }

    /// Attaches a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Report of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Run identifier.
    pub run_id: SyncRunId,
    /// Target workspace identifier.
    pub target_workspace: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub completed_at: DateTime<Utc>,
    /// Per-item outcomes in processing order.
    pub outcomes: Vec<ItemOutcome>,
    /// Number of redirection keys registered.
    pub redirections: usize,
}

impl SyncReport {
    /// Returns the number of outcomes with the given action.
    #[must_use]
    pub fn count(&self, action: SyncAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    /// Returns outcomes that failed without aborting the run.
    #[must_use]
    pub fn failures(&self) -> Vec<&ItemOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.action == SyncAction::DeleteFailed)
            .collect()
    }

    /// Returns the outcome for an item, if any.
    #[must_use]
    pub fn outcome(&self, item: &ItemIdentity) -> Option<&ItemOutcome> {
        self.outcomes.iter().find(|o| &o.item == item)
    }

    /// Returns true if nothing was created or deleted.
    #[must_use]
    pub fn is_structural_noop(&self) -> bool {
        self.count(SyncAction::Created) == 0
            && self.count(SyncAction::Deleted) == 0
            && self.count(SyncAction::DeleteFailed) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;

    #[test]
    fn run_id_roundtrip() {
        let id = SyncRunId::generate();
        let parsed: SyncRunId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("nope".parse::<SyncRunId>().is_err());
    }

    #[test]
    fn report_counts_and_failures() {
        let now = Utc::now();
        let report = SyncReport {
            run_id: SyncRunId::generate(),
            target_workspace: "ws".into(),
            started_at: now,
            completed_at: now,
            outcomes: vec![
                ItemOutcome::new(
                    ItemIdentity::new("Sales", ItemKind::Lakehouse),
                    SyncAction::Created,
                    Some("1".into()),
                ),
                ItemOutcome::new(
                    ItemIdentity::new("Legacy Report", ItemKind::Report),
                    SyncAction::DeleteFailed,
                    Some("2".into()),
                )
                .with_detail("locked"),
            ],
            redirections: 3,
        };

        assert_eq!(report.count(SyncAction::Created), 1);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].detail.as_deref(), Some("locked"));
        assert!(!report.is_structural_noop());
    }

    #[test]
    fn action_serializes_snake_case() {
        let json = serde_json::to_string(&SyncAction::DeleteFailed).unwrap();
        assert_eq!(json, "\"delete_failed\"");
    }
}
