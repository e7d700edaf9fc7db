//! Error types and result aliases for itemsync.
//!
//! Loader and rewriter errors are caller bugs (the desired item set is assumed
//! internally consistent) and abort a run. Remote failures abort a run too,
//! except during orphan deletion where the driver records them per item.

/// The result type used throughout itemsync.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, rewriting, or reconciling items.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The tracked file listing cannot be turned into an item set.
    #[error("malformed item set: {message}")]
    MalformedItemSet {
        /// Description of what is wrong with the listing.
        message: String,
    },

    /// A part expected for a kind-specific rewrite is missing.
    #[error("part '{part}' not found in definition of '{item}'")]
    PartNotFound {
        /// Item the part was looked up in (`name.Kind`).
        item: String,
        /// Part path that was expected.
        part: String,
    },

    /// A report model binding is not a by-path reference.
    #[error("report '{report}' has an unsupported model binding: {message}")]
    UnsupportedBindingKind {
        /// Report display name.
        report: String,
        /// Description of the binding that was found.
        message: String,
    },

    /// A by-path report binding names a model that does not exist in the target workspace.
    #[error("semantic model '{model}' referenced by report '{report}' not found in target workspace")]
    BindingTargetNotFound {
        /// Report display name.
        report: String,
        /// Model display name derived from the binding path.
        model: String,
    },

    /// A call to the remote item service failed.
    #[error("remote operation '{operation}' failed for {target}: {message}")]
    RemoteOperationFailed {
        /// Operation name (for example `create_item`).
        operation: &'static str,
        /// Identifiers involved in the call.
        target: String,
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A redirection key was registered twice with different values.
    #[error("redirection key '{key}' already maps to '{existing}', refusing to remap to '{attempted}'")]
    DuplicateRedirectionKey {
        /// The old reference string.
        key: String,
        /// Value already registered for the key.
        existing: String,
        /// Value of the rejected registration.
        attempted: String,
    },

    /// A sentinel file, structured part, or payload could not be decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the decoding failure.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a malformed item set error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedItemSet {
            message: message.into(),
        }
    }

    /// Creates a remote operation error without an underlying cause.
    #[must_use]
    pub fn remote(
        operation: &'static str,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::RemoteOperationFailed {
            operation,
            target: target.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a remote operation error with a source cause.
    #[must_use]
    pub fn remote_with_source(
        operation: &'static str,
        target: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::RemoteOperationFailed {
            operation,
            target: target.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if the error came from the remote item service.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteOperationFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn malformed_item_set_display() {
        let err = Error::malformed("content file 'a/b.py' appears before any .platform file");
        assert!(err.to_string().contains("malformed item set"));
        assert!(err.to_string().contains("a/b.py"));
    }

    #[test]
    fn remote_error_names_operation_and_target() {
        let err = Error::remote("delete_item", "workspace ws-1 item it-9", "409 Conflict");
        let msg = err.to_string();
        assert!(msg.contains("delete_item"));
        assert!(msg.contains("it-9"));
        assert!(msg.contains("409"));
        assert!(err.is_remote());
    }

    #[test]
    fn remote_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = Error::remote_with_source("run_item", "item nb-1", source);
        assert!(err.to_string().contains("timed out"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn duplicate_key_display() {
        let err = Error::DuplicateRedirectionKey {
            key: "a".into(),
            existing: "b".into(),
            attempted: "c".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'a'"));
        assert!(msg.contains("'b'"));
        assert!(msg.contains("'c'"));
        assert!(!err.is_remote());
    }
}
