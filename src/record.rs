//! The in-flight unit of the content and template pipelines.

use std::path::{Path, PathBuf};

/// Metadata attached to a record. Values keep their YAML/JSON structure.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// How far a record has progressed through the content stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RenderStage {
    #[default]
    Raw,
    FrontMatterStripped,
    BodyRendered,
    LayoutApplied,
}

/// One file moving through a pipeline.
///
/// Created when a file is read from a source tree, mutated by each stage, and
/// written to the output tree at the end. `path` is relative to the source root
/// and becomes the output-relative path.
#[derive(Debug, Clone, Default)]
pub struct FileRecord {
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub metadata: Metadata,
    pub stage: RenderStage,
    /// Parsed front matter waiting to be merged into `metadata`.
    pub front_matter: Option<Metadata>,
    /// Recoverable problems found while processing this file.
    pub warnings: Vec<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            ..Self::default()
        }
    }

    /// Read `root/relative` into a fresh record.
    pub fn read(root: &Path, relative: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read(root.join(relative))?;
        Ok(Self::new(relative, contents))
    }

    /// Contents as text. Invalid UTF-8 sequences are replaced.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.contents)
    }

    pub fn set_text(&mut self, text: String) {
        self.contents = text.into_bytes();
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}
