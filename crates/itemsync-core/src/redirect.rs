//! Run-scoped redirection table.
//!
//! Maps source-workspace reference strings (item identifiers, endpoint
//! identifiers, endpoint connection strings) to their target-workspace
//! equivalents. The table only grows during a run: a key is inserted at most
//! once, and substitution follows insertion order.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Ordered mapping from old reference strings to new reference strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectionTable {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl RedirectionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping from `old` to `new`.
    ///
    /// Registering a key that already maps to the same value is a no-op
    /// (several storage items can share one endpoint connection string).
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateRedirectionKey` if `old` already maps to a
    /// different value, and `Error::InvalidInput` for an empty key.
    pub fn register(&mut self, old: impl Into<String>, new: impl Into<String>) -> Result<()> {
        let old = old.into();
        let new = new.into();

        if old.is_empty() {
            return Err(Error::InvalidInput(format!(
                "redirection key for '{new}' is empty"
            )));
        }

        if let Some(&pos) = self.index.get(&old) {
            let existing = &self.entries[pos].1;
            if *existing == new {
                return Ok(());
            }
            return Err(Error::DuplicateRedirectionKey {
                key: old,
                existing: existing.clone(),
                attempted: new,
            });
        }

        tracing::debug!(old = %old, new = %new, "registered redirection");
        self.index.insert(old.clone(), self.entries.len());
        self.entries.push((old, new));
        Ok(())
    }

    /// Adds two mappings, used for a storage endpoint's dual identity.
    ///
    /// # Errors
    ///
    /// Same as [`RedirectionTable::register`]; the first pair is kept if the
    /// second one fails.
    pub fn register_pair(
        &mut self,
        old_a: impl Into<String>,
        new_a: impl Into<String>,
        old_b: impl Into<String>,
        new_b: impl Into<String>,
    ) -> Result<()> {
        self.register(old_a, new_a)?;
        self.register(old_b, new_b)
    }

    /// Returns the value registered for `old`.
    #[must_use]
    pub fn lookup(&self, old: &str) -> Option<&str> {
        self.index
            .get(old)
            .map(|&pos| self.entries[pos].1.as_str())
    }

    /// Returns the number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over mappings in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replaces every literal occurrence of every key in `text`.
    ///
    /// Keys are applied in insertion order, each over the output of the
    /// previous one. Matching is plain substring matching with no token
    /// boundaries.
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (old, new) in &self.entries {
            if out.contains(old.as_str()) {
                out = out.replace(old.as_str(), new);
            }
        }
        out
    }
}
