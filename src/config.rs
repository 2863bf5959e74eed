//! Project configuration.
//!
//! Handles loading, validating, and freezing `site.toml`. Stock defaults are
//! overridden key-by-key by the project's file, and CLI flags override both.
//! The result is frozen into a [`BuildConfig`] that every component receives
//! at construction; nothing reads configuration from global state.
//!
//! ## Config File Location
//!
//! ```text
//! project/
//! ├── site.toml             # Optional, sparse overrides of the defaults
//! └── app/
//!     ├── content/          # Markdown + static files
//!     ├── templates/        # Tera layouts with asset-reference regions
//!     ├── styles/main.scss  # Stylesheet entry point
//!     └── scripts/          # Script sources
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! [paths]
//! output = ".tmp"
//! app = "app"
//! styles = "app/styles"
//! scripts = "app/scripts"
//! templates = "app/templates"
//! content = "app/content"
//!
//! [content]
//! renderable = ["*.md"]
//! default_layout = "default.html"
//! layout_key = "layout"
//!
//! [styles]
//! entry = "main.scss"
//!
//! [server]
//! host = "localhost"
//! port = 8000
//!
//! [watch]
//! debounce_ms = 200
//!
//! [publish]
//! remote = "origin"
//! branch = "gh-pages"
//! message = "Publish site"
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Name of the project configuration file.
pub const CONFIG_FILENAME: &str = "site.toml";

/// Scratch directory under the output root for merged templates.
///
/// Hidden, so no content path can render into it.
pub const STAGING_DIR: &str = ".templates";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Template directory not found: {0}")]
    MissingTemplates(PathBuf),
    #[error("Output directory {output} overlaps the {input} directory {path}")]
    OutputOverlap {
        output: PathBuf,
        input: &'static str,
        path: PathBuf,
    },
}

/// Which pipeline stages are active for a run.
///
/// Selected once per invocation and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Raw CSS with source maps, unbundled scripts and asset references.
    #[default]
    Development,
    /// Minified, fingerprinted bundles, no source maps.
    Distribution,
}

impl BuildMode {
    pub fn from_dist_flag(dist: bool) -> Self {
        if dist {
            BuildMode::Distribution
        } else {
            BuildMode::Development
        }
    }

    pub fn is_dist(self) -> bool {
        self == BuildMode::Distribution
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildMode::Development => write!(f, "development"),
            BuildMode::Distribution => write!(f, "distribution"),
        }
    }
}

/// Project configuration loaded from `site.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub paths: PathsConfig,
    pub content: ContentConfig,
    pub styles: StylesConfig,
    pub server: ServerConfig,
    pub watch: WatchConfig,
    pub publish: PublishConfig,
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content.renderable.is_empty() {
            return Err(ConfigError::Validation(
                "content.renderable must not be empty".into(),
            ));
        }
        if self.content.default_layout.trim().is_empty() {
            return Err(ConfigError::Validation(
                "content.default_layout must not be empty".into(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port must be non-zero".into()));
        }
        if self.paths.output.trim().is_empty() || self.paths.output == "." {
            return Err(ConfigError::Validation(
                "paths.output must name a dedicated directory".into(),
            ));
        }
        Ok(())
    }
}

/// Input and output locations, relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Build output root. Cleared wholesale by `cleanup`.
    pub output: String,
    /// Application root, second search root for asset references.
    pub app: String,
    pub styles: String,
    pub scripts: String,
    pub templates: String,
    pub content: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output: ".tmp".to_string(),
            app: "app".to_string(),
            styles: "app/styles".to_string(),
            scripts: "app/scripts".to_string(),
            templates: "app/templates".to_string(),
            content: "app/content".to_string(),
        }
    }
}

/// Content pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContentConfig {
    /// File-name globs selecting the markup sources.
    pub renderable: Vec<String>,
    /// Layout used when a page's metadata names none.
    pub default_layout: String,
    /// Metadata key holding the layout name.
    pub layout_key: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            renderable: vec!["*.md".to_string()],
            default_layout: "default.html".to_string(),
            layout_key: "layout".to_string(),
        }
    }
}

/// Stylesheet settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StylesConfig {
    /// Entry point, relative to `paths.styles`.
    pub entry: String,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            entry: "main.scss".to_string(),
        }
    }
}

/// Development server settings. Only consumed by `serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
        }
    }
}

/// Watch mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Filesystem events closer together than this are delivered as one batch.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 200 }
    }
}

/// Publishing settings for the git pages publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    pub remote: String,
    pub branch: String,
    pub message: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch: "gh-pages".to_string(),
            message: "Publish site".to_string(),
        }
    }
}

// =============================================================================
// Config loading and merging
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `site.toml` from the project root, merged over stock defaults.
///
/// A missing file yields the defaults; invalid TOML or unknown keys are errors.
pub fn load_config(project_root: &Path) -> Result<SiteConfig, ConfigError> {
    let config_path = project_root.join(CONFIG_FILENAME);
    let merged = if config_path.exists() {
        let content = fs::read_to_string(&config_path)?;
        let overlay: toml::Value = toml::from_str(&content)?;
        merge_toml(stock_defaults_value(), overlay)
    } else {
        stock_defaults_value()
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Values from the command line that override the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dist: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Frozen, fully-resolved configuration for one invocation.
///
/// Paths are joined onto the project root. Shared as `Arc<BuildConfig>`.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub mode: BuildMode,
    pub project_root: PathBuf,
    pub output: PathBuf,
    pub app: PathBuf,
    pub styles: PathBuf,
    pub scripts: PathBuf,
    pub templates: PathBuf,
    pub content: PathBuf,
    /// Scratch directory holding merged templates between `templates` and `smith`.
    pub staged_templates: PathBuf,
    pub renderable: Vec<String>,
    pub default_layout: String,
    pub layout_key: String,
    pub style_entry: String,
    pub host: String,
    pub port: u16,
    pub debounce_ms: u64,
    pub publish: PublishConfig,
}

impl BuildConfig {
    /// Resolve a [`SiteConfig`] against a project root and CLI overrides.
    ///
    /// Paths are made absolute and normalized. Fails if the template
    /// directory does not exist, or if the output directory would contain the
    /// project or a source directory, so a broken project is rejected before
    /// any task starts.
    pub fn resolve(
        project_root: &Path,
        site: SiteConfig,
        overrides: Overrides,
    ) -> Result<Arc<Self>, ConfigError> {
        let root = normalize(&std::path::absolute(project_root)?);
        let join = |relative: &str| normalize(&root.join(relative));
        let output = join(&site.paths.output);
        let app = join(&site.paths.app);
        let styles = join(&site.paths.styles);
        let scripts = join(&site.paths.scripts);
        let templates = join(&site.paths.templates);
        let content = join(&site.paths.content);

        check_output(&output, &root, &app, &[
            ("content", &content),
            ("templates", &templates),
            ("styles", &styles),
            ("scripts", &scripts),
        ])?;
        if !templates.is_dir() {
            return Err(ConfigError::MissingTemplates(templates));
        }
        Ok(Arc::new(Self {
            mode: BuildMode::from_dist_flag(overrides.dist),
            staged_templates: output.join(STAGING_DIR),
            app,
            styles,
            scripts,
            content,
            templates,
            output,
            renderable: site.content.renderable,
            default_layout: site.content.default_layout,
            layout_key: site.content.layout_key,
            style_entry: site.styles.entry,
            host: overrides.host.unwrap_or(site.server.host),
            port: overrides.port.unwrap_or(site.server.port),
            debounce_ms: site.watch.debounce_ms,
            publish: site.publish,
            project_root: root,
        }))
    }

    /// Load `site.toml` and resolve it in one step.
    pub fn load(project_root: &Path, overrides: Overrides) -> Result<Arc<Self>, ConfigError> {
        let site = load_config(project_root)?;
        Self::resolve(project_root, site, overrides)
    }

    /// Same configuration with a different mode (used by `publish`).
    pub fn with_mode(&self, mode: BuildMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            ..self.clone()
        })
    }
}

/// Lexically resolve `.` and `..` components of an absolute path.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// The output is cleared by every full build, and its contents must never be
/// read back as sources.
fn check_output(
    output: &Path,
    root: &Path,
    app: &Path,
    sources: &[(&'static str, &Path)],
) -> Result<(), ConfigError> {
    let overlap = |input: &'static str, path: &Path| ConfigError::OutputOverlap {
        output: output.to_path_buf(),
        input,
        path: path.to_path_buf(),
    };
    if root.starts_with(output) {
        return Err(overlap("project", root));
    }
    if app.starts_with(output) {
        return Err(overlap("app", app));
    }
    for &(input, path) in sources {
        if path.starts_with(output) || output.starts_with(path) {
            return Err(overlap(input, path));
        }
    }
    Ok(())
}

/// Returns a fully-commented stock `site.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Sitesmith Configuration
# =======================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Paths (relative to the project root)
# ---------------------------------------------------------------------------
[paths]
# Build output. Emptied at the start of every full build.
output = ".tmp"
# Application root. Asset references not found in the output are looked up here.
app = "app"
styles = "app/styles"
scripts = "app/scripts"
templates = "app/templates"
content = "app/content"

# ---------------------------------------------------------------------------
# Content pipeline
# ---------------------------------------------------------------------------
[content]
# File-name globs rendered as markdown. Everything else is copied as-is.
renderable = ["*.md"]
# Layout applied when a page's front matter names none.
default_layout = "default.html"
# Front matter key naming the layout.
layout_key = "layout"

# ---------------------------------------------------------------------------
# Stylesheets
# ---------------------------------------------------------------------------
[styles]
# SCSS entry point, relative to paths.styles.
entry = "main.scss"

# ---------------------------------------------------------------------------
# Development server (sitesmith serve)
# ---------------------------------------------------------------------------
[server]
host = "localhost"
port = 8000

# ---------------------------------------------------------------------------
# Watch mode
# ---------------------------------------------------------------------------
[watch]
# Events closer together than this are rebuilt as one batch.
debounce_ms = 200

# ---------------------------------------------------------------------------
# Publishing (sitesmith publish)
# ---------------------------------------------------------------------------
[publish]
remote = "origin"
branch = "gh-pages"
message = "Publish site"
"##
}
