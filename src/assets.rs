//! Stylesheet and script assets.
//!
//! ```text
//!                      development                    distribution
//! styles/main.scss →   styles/main.css (expanded)     styles/main-<fp>.css (compressed)
//!                      styles/main.css.map
//! scripts/**/*.js  →   scripts/**/*.js (copied)       scripts/**/*.js (minified)
//! ```
//!
//! The stylesheet compiler sits behind [`StylesheetCompiler`]; production
//! uses grass. Each function returns what it wrote plus the manifest entries
//! it created, and leaves merging those into the shared build state to the
//! caller.

use crate::config::BuildConfig;
use crate::files::{FileSet, SelectError, Selector, to_slash};
use crate::fingerprint::{fingerprint, fingerprinted_name};
use crate::manifest::{AssetManifest, ManifestEntry};
use crate::minify::{Minifier, MinifyError};
use crate::output_tree::{OutputError, OutputTree};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to compile {}: {message}", .path.display())]
    Compile { path: PathBuf, message: String },
    #[error(transparent)]
    Minify(#[from] MinifyError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error("Source map encoding failed: {0}")]
    SourceMap(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssStyle {
    Expanded,
    Compressed,
}

/// Compiles a stylesheet entry point (and its imports) to CSS.
pub trait StylesheetCompiler: Send + Sync {
    fn compile(&self, entry: &Path, style: CssStyle) -> Result<String, AssetError>;
}

/// SCSS via grass. Imports resolve relative to the entry's directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrassCompiler;

impl StylesheetCompiler for GrassCompiler {
    fn compile(&self, entry: &Path, style: CssStyle) -> Result<String, AssetError> {
        let output_style = match style {
            CssStyle::Expanded => grass::OutputStyle::Expanded,
            CssStyle::Compressed => grass::OutputStyle::Compressed,
        };
        let load_paths: Vec<PathBuf> = entry.parent().map(Path::to_path_buf).into_iter().collect();
        let options = grass::Options::default()
            .load_paths(&load_paths)
            .style(output_style);
        grass::from_path(entry, &options).map_err(|e| AssetError::Compile {
            path: entry.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Files written by an asset step plus the manifest entries it produced.
#[derive(Debug, Default)]
pub struct AssetOutput {
    pub written: Vec<PathBuf>,
    pub manifest: AssetManifest,
}

/// Where a source directory lands in the output tree: its path relative to
/// the app root, or `fallback` when it lives elsewhere.
pub fn output_prefix(dir: &Path, app: &Path, fallback: &str) -> PathBuf {
    dir.strip_prefix(app)
        .ok()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(fallback))
}

/// Compile the stylesheet entry point.
///
/// A project without the entry file has no stylesheet step; that is not an
/// error.
pub fn build_styles(
    config: &BuildConfig,
    compiler: &dyn StylesheetCompiler,
    output: &OutputTree,
) -> Result<AssetOutput, AssetError> {
    let entry = config.styles.join(&config.style_entry);
    if !entry.is_file() {
        info!(entry = %entry.display(), "No stylesheet entry, skipping styles");
        return Ok(AssetOutput::default());
    }

    let prefix = output_prefix(&config.styles, &config.app, "styles");
    let css_name = Path::new(&config.style_entry).with_extension("css");
    let logical = prefix.join(&css_name);
    let source = relative_to(&entry, &config.project_root);

    let mut result = AssetOutput::default();
    if config.mode.is_dist() {
        let css = compiler.compile(&entry, CssStyle::Compressed)?;
        let fp = fingerprint(css.as_bytes());
        let physical = fingerprinted_name(&logical, &fp);
        output.write(&physical, css.as_bytes())?;
        result.manifest.insert(
            to_slash(&logical),
            ManifestEntry {
                path: to_slash(&physical),
                fingerprint: Some(fp),
                sources: vec![source],
            },
        );
        result.written.push(physical);
    } else {
        let mut css = compiler.compile(&entry, CssStyle::Expanded)?;
        let map_name = format!("{}.map", css_name.display());
        if !css.ends_with('\n') {
            css.push('\n');
        }
        css.push_str(&format!("/*# sourceMappingURL={map_name} */\n"));

        let map = source_map(&css_name, &config.styles)?;
        let map_path = logical.with_file_name(&map_name);
        output.write(&logical, css.as_bytes())?;
        output.write(&map_path, map.as_bytes())?;
        result.written.push(logical);
        result.written.push(map_path);
    }
    info!(mode = %config.mode, "Compiled stylesheet");
    Ok(result)
}

/// A version 3 source map listing every stylesheet source with its content.
///
/// grass does not emit mappings, so `mappings` is empty; devtools still show
/// the SCSS sources through `sourcesContent`.
fn source_map(css_name: &Path, styles_dir: &Path) -> Result<String, AssetError> {
    let selector = Selector::new(&["*.scss", "*.sass", "*.css"])?;
    let files = FileSet::new(styles_dir, selector).resolve()?;
    let mut sources = Vec::with_capacity(files.len());
    let mut contents = Vec::with_capacity(files.len());
    for rel in &files {
        sources.push(to_slash(rel));
        contents.push(std::fs::read_to_string(styles_dir.join(rel))?);
    }
    let map = serde_json::json!({
        "version": 3,
        "file": to_slash(css_name),
        "sources": sources,
        "sourcesContent": contents,
        "names": [],
        "mappings": "",
    });
    Ok(serde_json::to_string(&map)?)
}

/// Copy (development) or minify (distribution) every script.
///
/// The directory structure under the scripts root is kept as-is.
pub fn build_scripts(
    config: &BuildConfig,
    minifier: &dyn Minifier,
    output: &OutputTree,
) -> Result<AssetOutput, AssetError> {
    let files = FileSet::new(&config.scripts, Selector::new(&["*.js"])?).resolve()?;
    let prefix = output_prefix(&config.scripts, &config.app, "scripts");
    let dist = config.mode.is_dist();

    let written = files
        .par_iter()
        .map(|rel| -> Result<PathBuf, AssetError> {
            let source = std::fs::read_to_string(config.scripts.join(rel))?;
            let body = if dist {
                minifier.minify(&source)?
            } else {
                source
            };
            let target = prefix.join(rel);
            output.write(&target, body.as_bytes())?;
            debug!(script = %target.display(), "Wrote script");
            Ok(target)
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(count = written.len(), mode = %config.mode, "Processed scripts");
    Ok(AssetOutput {
        written,
        manifest: AssetManifest::new(),
    })
}

fn relative_to(path: &Path, root: &Path) -> String {
    to_slash(path.strip_prefix(root).unwrap_or(path))
}
