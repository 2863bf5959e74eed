//! Content pipeline (the `smith` task).
//!
//! Every file under the content root is read into a [`FileRecord`].
//! Renderable files (by default `*.md`) go through four fixed stages:
//!
//! ```text
//! extract-front-matter → merge-metadata → render-markup → apply-layout
//! ```
//!
//! Everything else is written to the output unchanged. Layouts come from the
//! staged template tree produced by the `templates` task; once every output
//! file is written, the staged tree is deleted.

use crate::config::{BuildConfig, STAGING_DIR};
use crate::files::{FileSet, SelectError, Selector, to_slash};
use crate::frontmatter;
use crate::graph::TaskError;
use crate::layout::{LayoutContext, LayoutEngine, LayoutError, TeraLayouts};
use crate::markup::MarkupRenderer;
use crate::output_tree::{OutputError, OutputTree};
use crate::pipeline::{Pipeline, PipelineError, Transform};
use crate::record::{FileRecord, RenderStage};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Templates have not been staged: {} is missing", .0.display())]
    NotStaged(PathBuf),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Select(#[from] SelectError),
}

struct ExtractFrontMatter;

impl Transform for ExtractFrontMatter {
    fn name(&self) -> &'static str {
        "extract-front-matter"
    }

    fn apply(&self, mut record: FileRecord) -> Result<FileRecord, TaskError> {
        frontmatter::extract(&mut record);
        Ok(record)
    }
}

struct MergeMetadata;

impl Transform for MergeMetadata {
    fn name(&self) -> &'static str {
        "merge-metadata"
    }

    fn apply(&self, mut record: FileRecord) -> Result<FileRecord, TaskError> {
        frontmatter::merge(&mut record);
        Ok(record)
    }
}

struct RenderMarkup<'a> {
    renderer: &'a dyn MarkupRenderer,
}

impl Transform for RenderMarkup<'_> {
    fn name(&self) -> &'static str {
        "render-markup"
    }

    fn apply(&self, mut record: FileRecord) -> Result<FileRecord, TaskError> {
        if record.stage >= RenderStage::BodyRendered {
            return Ok(record);
        }
        let html = self.renderer.render(&record.text())?;
        record.set_text(html);
        record.path.set_extension("html");
        record.stage = RenderStage::BodyRendered;
        Ok(record)
    }
}

struct ApplyLayout<'a> {
    layouts: &'a dyn LayoutEngine,
    default_layout: &'a str,
    layout_key: &'a str,
}

impl Transform for ApplyLayout<'_> {
    fn name(&self) -> &'static str {
        "apply-layout"
    }

    fn apply(&self, mut record: FileRecord) -> Result<FileRecord, TaskError> {
        if record.stage >= RenderStage::LayoutApplied {
            return Ok(record);
        }
        let layout = match record.metadata.get(self.layout_key) {
            None => self.default_layout.to_string(),
            Some(serde_json::Value::String(name)) => name.clone(),
            Some(other) => {
                return Err(format!("'{}' must be a layout name, found {other}", self.layout_key).into());
            }
        };
        let html = {
            let contents = record.text();
            let path = to_slash(&record.path);
            let context = LayoutContext {
                metadata: &record.metadata,
                contents: &contents,
                path: &path,
            };
            self.layouts.render(&layout, &context)?
        };
        record.set_text(html);
        record.stage = RenderStage::LayoutApplied;
        Ok(record)
    }
}

/// The four content stages, in order.
pub fn content_pipeline<'a>(
    config: &'a BuildConfig,
    renderer: &'a dyn MarkupRenderer,
    layouts: &'a dyn LayoutEngine,
) -> Pipeline<'a> {
    Pipeline::new(vec![
        Box::new(ExtractFrontMatter),
        Box::new(MergeMetadata),
        Box::new(RenderMarkup { renderer }),
        Box::new(ApplyLayout {
            layouts,
            default_layout: &config.default_layout,
            layout_key: &config.layout_key,
        }),
    ])
}

/// Result of one content run.
#[derive(Debug, Default)]
pub struct ContentOutput {
    /// Output-relative paths, in content order.
    pub written: Vec<PathBuf>,
    /// Recoverable per-file problems (content-relative source path, message).
    pub warnings: Vec<(PathBuf, String)>,
    pub rendered: usize,
}

/// Render and write every content file. Does not touch the staged templates.
pub fn render_content(
    config: &BuildConfig,
    renderer: &dyn MarkupRenderer,
    layouts: &dyn LayoutEngine,
    output: &OutputTree,
) -> Result<ContentOutput, ContentError> {
    let renderable = Selector::new(&config.renderable)?;
    let files = FileSet::new(&config.content, Selector::all()).resolve()?;
    let pipeline = content_pipeline(config, renderer, layouts);

    let records = files
        .par_iter()
        .map(|rel| -> Result<(FileRecord, bool), ContentError> {
            let record = FileRecord::read(&config.content, rel)?;
            if renderable.matches(rel) {
                Ok((pipeline.run(record)?, true))
            } else {
                Ok((record, false))
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    records
        .par_iter()
        .try_for_each(|(record, _)| output.write(&record.path, &record.contents).map(|_| ()))?;

    let mut result = ContentOutput::default();
    for (source, (record, rendered)) in files.into_iter().zip(records) {
        if rendered {
            result.rendered += 1;
        }
        for warning in record.warnings {
            result.warnings.push((source.clone(), warning));
        }
        result.written.push(record.path);
    }
    Ok(result)
}

/// The `smith` task: load staged layouts, render content, drop the staging
/// directory.
///
/// The staging directory is only removed after every write succeeded, so a
/// failed run leaves it behind.
pub fn smith(
    config: &BuildConfig,
    renderer: &dyn MarkupRenderer,
    output: &OutputTree,
) -> Result<ContentOutput, ContentError> {
    if !config.staged_templates.is_dir() {
        return Err(ContentError::NotStaged(config.staged_templates.clone()));
    }
    let layouts = TeraLayouts::load(&config.staged_templates)?;
    let result = render_content(config, renderer, &layouts, output)?;

    let staged = config
        .staged_templates
        .strip_prefix(&config.output)
        .unwrap_or(Path::new(STAGING_DIR));
    output.remove_scratch(staged)?;
    info!(
        files = result.written.len(),
        rendered = result.rendered,
        warnings = result.warnings.len(),
        "Rendered content"
    );
    Ok(result)
}
