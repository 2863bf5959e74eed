//! The build output directory.
//!
//! Writes land atomically: content goes to a hidden sibling file that is
//! renamed into place, so the dev server and concurrent watch runs never see a
//! half-written file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to clear {}: {source}", .path.display())]
    Clear {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Refusing to write outside the output tree: {}", .0.display())]
    Escapes(PathBuf),
}

#[derive(Debug, Clone)]
pub struct OutputTree {
    root: PathBuf,
}

impl OutputTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove every entry under the root. The root itself is kept (or
    /// created), so a running server keeps serving the same directory.
    pub fn clear(&self) -> Result<(), OutputError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(clear_err(&self.root))?;
            return Ok(());
        }
        for entry in fs::read_dir(&self.root).map_err(clear_err(&self.root))? {
            let path = entry.map_err(clear_err(&self.root))?.path();
            let result = if path.is_dir() && !path.is_symlink() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(clear_err(&path))?;
        }
        info!(root = %self.root.display(), "Cleared output");
        Ok(())
    }

    /// Write `contents` to `relative` under the root, creating parents.
    pub fn write(&self, relative: &Path, contents: &[u8]) -> Result<PathBuf, OutputError> {
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(OutputError::Escapes(relative.to_path_buf()));
        }
        let target = self.root.join(relative);
        write_atomic(&target, contents).map_err(|source| OutputError::Write {
            path: target.clone(),
            source,
        })?;
        debug!(path = %target.display(), bytes = contents.len(), "Wrote");
        Ok(target)
    }

    /// Delete a scratch directory under the root. Missing is fine.
    pub fn remove_scratch(&self, relative: &Path) -> Result<(), OutputError> {
        let path = self.root.join(relative);
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(OutputError::Clear { path, source }),
        }
    }
}

fn clear_err(path: &Path) -> impl FnOnce(io::Error) -> OutputError + use<> {
    let path = path.to_path_buf();
    move |source| OutputError::Clear { path, source }
}

fn write_atomic(target: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = target.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(
        ".{name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let result = (|| {
        let mut file = fs::File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp, target)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}
