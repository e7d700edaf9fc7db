//! Source-control collaborator interface.

use async_trait::async_trait;

use crate::error::Result;

/// A file tracked under a project root.
///
/// `full_path` is `<item folder>/<path within item>` with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Path relative to the project root.
    pub full_path: String,
    /// Raw file content.
    pub content: Vec<u8>,
}

impl TrackedFile {
    /// Creates a tracked file.
    #[must_use]
    pub fn new(full_path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            full_path: full_path.into(),
            content: content.into(),
        }
    }

    /// Returns the item folder (text before the first `/`).
    #[must_use]
    pub fn item_folder(&self) -> &str {
        self.full_path
            .split_once('/')
            .map_or(self.full_path.as_str(), |(folder, _)| folder)
    }

    /// Returns the path within the item folder (text after the first `/`).
    ///
    /// Files sitting directly under the project root have an empty path.
    #[must_use]
    pub fn path(&self) -> &str {
        self.full_path
            .split_once('/')
            .map_or("", |(_, path)| path)
    }

    /// Returns the last path segment.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.full_path
            .rsplit('/')
            .next()
            .unwrap_or(self.full_path.as_str())
    }
}

/// Lists the files tracked for a project, grouped by item folder.
///
/// Implementations must yield each item folder's `.platform` sentinel before
/// the folder's other files.
#[async_trait]
pub trait TrackedFileSource: Send + Sync {
    /// Returns the tracked files of `project` in arrival order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be read.
    async fn list_tracked_files(&self, project: &str) -> Result<Vec<TrackedFile>>;
}
