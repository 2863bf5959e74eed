//! Source selection: glob patterns to concrete file lists.
//!
//! Every pipeline stage names its inputs as a root directory plus glob
//! patterns. [`FileSet::resolve`] walks the root and returns the matching
//! files as root-relative paths, sorted, so stages see a deterministic order.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SelectError {
    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),
    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Compiled set of glob patterns.
///
/// Patterns containing a `/` match against the whole relative path; patterns
/// without one match against the file name only, so `*.md` selects markdown
/// files at any depth.
#[derive(Debug, Clone)]
pub struct Selector {
    by_path: GlobSet,
    by_name: GlobSet,
}

impl Selector {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, SelectError> {
        let mut by_path = GlobSetBuilder::new();
        let mut by_name = GlobSetBuilder::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = Glob::new(pattern)?;
            if pattern.contains('/') {
                by_path.add(glob);
            } else {
                by_name.add(glob);
            }
        }
        Ok(Self {
            by_path: by_path.build()?,
            by_name: by_name.build()?,
        })
    }

    /// Selector that matches every file.
    pub fn all() -> Self {
        Self::new(&["**/*"]).expect("static pattern is valid")
    }

    /// Test a root-relative path.
    pub fn matches(&self, relative: &Path) -> bool {
        if self.by_path.is_match(relative) {
            return true;
        }
        relative
            .file_name()
            .is_some_and(|name| self.by_name.is_match(Path::new(name)))
    }
}

/// A root directory plus a selector.
#[derive(Debug, Clone)]
pub struct FileSet {
    pub root: PathBuf,
    pub selector: Selector,
}

impl FileSet {
    pub fn new(root: impl Into<PathBuf>, selector: Selector) -> Self {
        Self {
            root: root.into(),
            selector,
        }
    }

    /// Matching regular files as root-relative paths, sorted.
    ///
    /// A missing root resolves to an empty list.
    pub fn resolve(&self) -> Result<Vec<PathBuf>, SelectError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = entry.map_err(|source| SelectError::Walk {
                path: self.root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .expect("walkdir yields paths under its root");
            if is_hidden(relative) {
                continue;
            }
            if self.selector.matches(relative) {
                files.push(relative.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Dotfiles and anything under a dot-directory are never selected.
fn is_hidden(relative: &Path) -> bool {
    relative
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

/// Render a relative path with forward slashes, for manifests and URLs.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
