//! # Sitesmith
//!
//! A static site builder. Markdown pages with YAML front matter are rendered
//! into Tera layouts, stylesheets are compiled from SCSS, and asset references
//! in templates are bundled, minified and fingerprinted for distribution.
//!
//! # Architecture: Task Graph Over Per-File Pipelines
//!
//! Work is split into named tasks with declared dependencies. A run resolves
//! the requested tasks, executes each reachable task once, and runs tasks of
//! the same level in parallel:
//!
//! ```text
//! build    cleanup → assets:styles, assets:scripts → assets → templates → smith
//! smith    content/ → front matter → markdown → layout → output
//! watch    content/, templates/ → smith
//!          styles/              → assets:styles
//!          scripts/             → assets:scripts
//! ```
//!
//! Every run uses one [`config::BuildConfig`], frozen at startup, and one
//! [`config::BuildMode`]. The mode decides which stages a pipeline contains;
//! it is never consulted inside a stage.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`graph`] | Task registry, dependency validation, level-by-level execution |
//! | [`site`] | The default task set and per-run build state |
//! | [`pipeline`] | Ordered per-file transforms, assembled per mode |
//! | [`record`] | The per-file record flowing through a pipeline |
//! | [`frontmatter`] | YAML front matter extraction and metadata merge |
//! | [`markup`] | Markdown rendering behind the `MarkupRenderer` trait |
//! | [`layout`] | Tera layouts behind the `LayoutEngine` trait |
//! | [`content`] | The content pipeline (`smith`) |
//! | [`assets`] | Stylesheet compilation and script copying/minification |
//! | [`merger`] | Asset-reference regions in templates, bundling, rewriting |
//! | [`minify`] | CSS, JS and HTML minifiers |
//! | [`fingerprint`] | Content hashes and fingerprinted file names |
//! | [`manifest`] | Logical → fingerprinted asset mapping |
//! | [`output_tree`] | The output directory: clearing, atomic writes, scratch removal |
//! | [`files`] | Glob-selected file sets under a root |
//! | [`watch`] | Incremental rebuilds from filesystem events |
//! | [`serve`] | Local static file server |
//! | [`publish`] | Directory and git publishers |
//! | [`config`] | `site.toml` loading, validation, merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Scratch Templates
//!
//! `templates` writes merged layouts to `<output>/.templates`, and `smith`
//! renders pages against them. The scratch directory is removed only after
//! every page has been written, so a failed render leaves the merged layouts
//! in place for inspection.
//!
//! ## Incremental Runs Never Clear
//!
//! Only `cleanup` empties the output directory, and only `build` depends on
//! it. Watch-triggered runs overwrite what they produce and leave the rest of
//! the tree alone.

pub mod assets;
pub mod config;
pub mod content;
pub mod files;
pub mod fingerprint;
pub mod frontmatter;
pub mod graph;
pub mod layout;
pub mod manifest;
pub mod markup;
pub mod merger;
pub mod minify;
pub mod output;
pub mod output_tree;
pub mod pipeline;
pub mod publish;
pub mod record;
pub mod serve;
pub mod site;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
