//! Local directory implementation of the tracked file source.
//!
//! A project is a directory under the source root. Each child directory is
//! an item folder holding a `.platform` sentinel plus the item's parts.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use itemsync_core::error::{Error, Result};
use itemsync_core::item::PLATFORM_FILE;
use itemsync_core::source::{TrackedFile, TrackedFileSource};

/// Reads projects from a local checkout.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Creates a source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory a project lives in.
    #[must_use]
    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }
}

#[async_trait]
impl TrackedFileSource for DirectorySource {
    async fn list_tracked_files(&self, project: &str) -> Result<Vec<TrackedFile>> {
        let project_dir = self.project_dir(project);
        let mut folders = sorted_entries(&project_dir)?;
        folders.retain(|p| p.is_dir());

        let mut files = Vec::new();
        for folder in folders {
            let folder_name = utf8_name(&folder)?;
            let mut relative = Vec::new();
            collect_files(&folder, "", &mut relative)?;

            let Some(sentinel) = relative.iter().position(|p| p == PLATFORM_FILE) else {
                return Err(Error::malformed(format!(
                    "item folder '{folder_name}' has no {PLATFORM_FILE} file"
                )));
            };
            let sentinel = relative.remove(sentinel);

            for path in std::iter::once(sentinel).chain(relative) {
                let content = fs::read(folder.join(&path)).map_err(|e| {
                    Error::serialization(format!("failed to read '{folder_name}/{path}': {e}"))
                })?;
                files.push(TrackedFile::new(format!("{folder_name}/{path}"), content));
            }
        }

        tracing::debug!(project, files = files.len(), "listed tracked files");
        Ok(files)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::InvalidInput(format!("cannot read directory {}: {e}", dir.display()))
    })?;
    let mut paths = entries
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::InvalidInput(format!("cannot read directory {}: {e}", dir.display())))?;
    paths.sort();
    Ok(paths)
}

fn utf8_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::serialization(format!("non UTF-8 file name: {}", path.display())))
}

/// Collects file paths under `dir` relative to the item folder, `/`-separated.
fn collect_files(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<()> {
    for path in sorted_entries(dir)? {
        let name = utf8_name(&path)?;
        let relative = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}/{name}")
        };
        if path.is_dir() {
            collect_files(&path, &relative, out)?;
        } else {
            out.push(relative);
        }
    }
    Ok(())
}

/// Writes tracked files under `dir`, creating item folders as needed.
///
/// # Errors
///
/// Returns an error if a path escapes `dir` or a file cannot be written.
pub fn write_tracked_files(dir: &Path, files: &[TrackedFile]) -> anyhow::Result<()> {
    for file in files {
        if file.full_path.split('/').any(|s| s == ".." || s.is_empty()) {
            anyhow::bail!("refusing to write unsafe path '{}'", file.full_path);
        }
        let path = dir.join(&file.full_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &file.content)?;
    }
    Ok(())
}
