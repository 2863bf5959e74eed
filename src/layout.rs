//! Layout composition with Tera.
//!
//! Layouts are loaded from a template directory (the staged copy produced by
//! the `templates` task). A layout receives every metadata key of the page at
//! the top level, plus:
//!
//! - `contents`: the rendered body HTML. Use `{{ contents | safe }}`, since
//!   Tera escapes `.html` templates.
//! - `path`: the output-relative path of the page.
//!
//! ```html
//! <title>{{ title | default(value="Untitled") }}</title>
//! <main>{{ contents | safe }}</main>
//! ```

use crate::files::{FileSet, Selector, SelectError, to_slash};
use crate::record::Metadata;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Template error: {}", render_chain(.0))]
    Tera(#[from] tera::Error),
    #[error("Template selection error: {0}")]
    Select(#[from] SelectError),
    #[error("Unknown layout '{name}' (available: {available})")]
    UnknownLayout { name: String, available: String },
}

/// Tera hides the useful message in its source chain.
fn render_chain(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Values available to a layout.
#[derive(Debug)]
pub struct LayoutContext<'a> {
    pub metadata: &'a Metadata,
    pub contents: &'a str,
    pub path: &'a str,
}

/// Composes rendered content into a named layout.
pub trait LayoutEngine: Send + Sync {
    /// Resolve a requested layout name to a loaded template, if any.
    fn resolve(&self, name: &str) -> Option<String>;

    fn render(&self, layout: &str, context: &LayoutContext<'_>) -> Result<String, LayoutError>;
}

/// Tera templates loaded from a directory, named by relative path.
pub struct TeraLayouts {
    tera: Tera,
    names: BTreeSet<String>,
}

impl TeraLayouts {
    /// Load every non-hidden file under `dir` as a template.
    pub fn load(dir: &Path) -> Result<Self, LayoutError> {
        let files = FileSet::new(dir, Selector::all()).resolve()?;
        let mut tera = Tera::default();
        let named: Vec<(PathBuf, Option<String>)> = files
            .iter()
            .map(|rel| (dir.join(rel), Some(to_slash(rel))))
            .collect();
        tera.add_template_files(named)?;
        let names: BTreeSet<String> = files.iter().map(|rel| to_slash(rel)).collect();
        debug!(dir = %dir.display(), count = names.len(), "Loaded layouts");
        Ok(Self { tera, names })
    }

    /// Build from in-memory templates.
    pub fn from_raw(templates: &[(&str, &str)]) -> Result<Self, LayoutError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(templates.iter().copied())?;
        let names = templates.iter().map(|(name, _)| name.to_string()).collect();
        Ok(Self { tera, names })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl LayoutEngine for TeraLayouts {
    fn resolve(&self, name: &str) -> Option<String> {
        if self.names.contains(name) {
            return Some(name.to_string());
        }
        if Path::new(name).extension().is_none() {
            let with_ext = format!("{name}.html");
            if self.names.contains(&with_ext) {
                return Some(with_ext);
            }
        }
        None
    }

    fn render(&self, layout: &str, context: &LayoutContext<'_>) -> Result<String, LayoutError> {
        let name = self
            .resolve(layout)
            .ok_or_else(|| LayoutError::UnknownLayout {
                name: layout.to_string(),
                available: self.names.iter().cloned().collect::<Vec<_>>().join(", "),
            })?;
        let mut ctx = Context::from_value(serde_json::Value::Object(context.metadata.clone()))?;
        ctx.insert("contents", context.contents);
        ctx.insert("path", context.path);
        Ok(self.tera.render(&name, &ctx)?)
    }
}
