//! Template asset merger (the `templates` task).
//!
//! Templates mark groups of asset references with build regions:
//!
//! ```html
//! <!-- build:css styles/vendor.css -->
//! <link rel="stylesheet" href="styles/normalize.css">
//! <link rel="stylesheet" href="styles/main.css">
//! <!-- endbuild -->
//! ```
//!
//! The merger runs in three passes over the template tree:
//!
//! 1. **Parse** every HTML template and collect its regions.
//! 2. **Bundle** each distinct region target once. Distribution mode
//!    concatenates the members, minifies by the target's extension,
//!    fingerprints the result and records it in the manifest. Development
//!    mode only makes sure every member is reachable in the output tree.
//! 3. **Rewrite** each template through a mode-specific [`Pipeline`] and stage
//!    it under `<output>/.templates` for the content pipeline.
//!
//! Members resolve against the manifest first (compiled, fingerprinted
//! assets), then the output tree, then the app root.

use crate::config::{BuildConfig, BuildMode, STAGING_DIR};
use crate::files::{FileSet, SelectError, Selector, to_slash};
use crate::fingerprint::{fingerprint, fingerprinted_name};
use crate::graph::TaskError;
use crate::manifest::{AssetManifest, ManifestEntry};
use crate::minify::{Minifier, Minifiers, MinifyError};
use crate::output_tree::{OutputError, OutputTree};
use crate::pipeline::{Pipeline, PipelineError, Transform};
use crate::record::FileRecord;
use maud::html;
use rayon::prelude::*;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};

static OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*build:([A-Za-z]+)(?:\([^)]*\))?(?:\s+(\S+?))?\s*-->").expect("static regex")
});
static END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*endbuild\s*-->").expect("static regex"));
static MEMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<(?:link\b[^>]*?\bhref|script\b[^>]*?\bsrc)\s*=\s*["']([^"']+)["']"#)
        .expect("static regex")
});
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(href|src)\s*=\s*(["'])([^"']+)["']"#).expect("static regex")
});

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("build region '{0}' has no matching endbuild")]
    Unterminated(String),
    #[error("unknown build region type '{0}' (expected css, js or remove)")]
    UnknownKind(String),
    #[error("build:{0} region has no target")]
    MissingTarget(&'static str),
    #[error("build region '{0}' references no assets")]
    Empty(String),
    #[error("build region target '{0}' must be a local path")]
    ExternalTarget(String),
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{}: {source}", .template.display())]
    Region {
        template: PathBuf,
        #[source]
        source: RegionError,
    },
    #[error("{}: asset '{member}' not found in output or app root", .template.display())]
    MissingAsset { template: PathBuf, member: String },
    #[error("Bundle '{target}' is declared with different members in {} and {}", .first.display(), .second.display())]
    ConflictingBundle {
        target: String,
        first: PathBuf,
        second: PathBuf,
    },
    #[error("No minifier for bundle '{0}'")]
    NoMinifier(String),
    #[error(transparent)]
    Minify(#[from] MinifyError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Css,
    Js,
    Remove,
}

impl RegionKind {
    fn parse(kind: &str) -> Result<Self, RegionError> {
        match kind.to_ascii_lowercase().as_str() {
            "css" => Ok(Self::Css),
            "js" => Ok(Self::Js),
            "remove" => Ok(Self::Remove),
            _ => Err(RegionError::UnknownKind(kind.to_string())),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Js => "js",
            Self::Remove => "remove",
        }
    }
}

/// One `build:` ... `endbuild` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub kind: RegionKind,
    /// Bundle target as authored.
    pub target: String,
    /// Member references as authored, in document order.
    pub members: Vec<String>,
    /// Byte range including both markers.
    pub outer: Range<usize>,
    /// Byte range between the markers.
    pub inner: Range<usize>,
}

/// Find every build region in `text`.
pub fn parse_regions(text: &str) -> Result<Vec<Region>, RegionError> {
    let mut regions = Vec::new();
    let mut cursor = 0;
    while let Some(open) = OPEN.captures_at(text, cursor) {
        let (Some(whole), Some(kind)) = (open.get(0), open.get(1)) else {
            break;
        };
        let kind = RegionKind::parse(kind.as_str())?;
        let target = open.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
        if kind != RegionKind::Remove {
            if target.is_empty() {
                return Err(RegionError::MissingTarget(kind.name()));
            }
            if logical_key(&target).is_none() {
                return Err(RegionError::ExternalTarget(target));
            }
        }

        let end = END
            .find_at(text, whole.end())
            .ok_or_else(|| RegionError::Unterminated(target.clone()))?;
        if OPEN
            .find_at(text, whole.end())
            .is_some_and(|next| next.start() < end.start())
        {
            return Err(RegionError::Unterminated(target));
        }

        let inner = whole.end()..end.start();
        let members: Vec<String> = MEMBER
            .captures_iter(&text[inner.clone()])
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();
        if members.is_empty() && kind != RegionKind::Remove {
            return Err(RegionError::Empty(target));
        }

        regions.push(Region {
            kind,
            target,
            members,
            outer: whole.start()..end.end(),
            inner,
        });
        cursor = end.end();
    }
    Ok(regions)
}

/// Manifest key for an authored reference, or `None` for external URLs.
pub fn logical_key(reference: &str) -> Option<String> {
    let external = reference.contains("://")
        || reference.starts_with("//")
        || reference.starts_with('#')
        || reference.starts_with("data:")
        || reference.starts_with("mailto:")
        || reference.contains("{{")
        || reference.contains("{%");
    if external {
        return None;
    }
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let key = path.trim_start_matches("./").trim_start_matches('/');
    (!key.is_empty()).then(|| key.to_string())
}

/// Keep the authored form: absolute references stay absolute.
fn authored_reference(authored: &str, physical: &str) -> String {
    if authored.starts_with('/') {
        format!("/{physical}")
    } else {
        physical.to_string()
    }
}

fn bundle_tag(kind: RegionKind, href: &str) -> String {
    match kind {
        RegionKind::Css => html! { link rel="stylesheet" href=(href); }.into_string(),
        RegionKind::Js => html! { script src=(href) {} }.into_string(),
        RegionKind::Remove => String::new(),
    }
}

/// Re-parse regions inside a stage. Failures carry the stage's record path.
fn regions_of(record: &FileRecord) -> Result<(String, Vec<Region>), TaskError> {
    let text = record.text().into_owned();
    let regions = parse_regions(&text)?;
    Ok((text, regions))
}

/// Development: drop the markers, keep member tags, drop `remove` regions.
struct StripMarkers;

impl Transform for StripMarkers {
    fn name(&self) -> &'static str {
        "strip-build-markers"
    }

    fn apply(&self, mut record: FileRecord) -> Result<FileRecord, TaskError> {
        let (text, regions) = regions_of(&record)?;
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for region in &regions {
            out.push_str(&text[last..region.outer.start]);
            if region.kind != RegionKind::Remove {
                out.push_str(text[region.inner.clone()].trim());
            }
            last = region.outer.end;
        }
        out.push_str(&text[last..]);
        record.set_text(out);
        Ok(record)
    }
}

/// Distribution: each region becomes one tag for its fingerprinted bundle.
struct ReplaceRegions<'a> {
    manifest: &'a AssetManifest,
}

impl Transform for ReplaceRegions<'_> {
    fn name(&self) -> &'static str {
        "replace-build-regions"
    }

    fn apply(&self, mut record: FileRecord) -> Result<FileRecord, TaskError> {
        let (text, regions) = regions_of(&record)?;
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for region in &regions {
            out.push_str(&text[last..region.outer.start]);
            if region.kind != RegionKind::Remove {
                let key = logical_key(&region.target)
                    .ok_or_else(|| RegionError::ExternalTarget(region.target.clone()))?;
                let physical = self
                    .manifest
                    .resolve(&key)
                    .ok_or_else(|| format!("bundle '{}' was not built", region.target))?;
                let href = authored_reference(&region.target, physical);
                out.push_str(&bundle_tag(region.kind, &href));
            }
            last = region.outer.end;
        }
        out.push_str(&text[last..]);
        record.set_text(out);
        Ok(record)
    }
}

/// Distribution: plain `href`/`src` references to manifest keys point at the
/// fingerprinted files.
struct RewriteReferences<'a> {
    manifest: &'a AssetManifest,
}

impl Transform for RewriteReferences<'_> {
    fn name(&self) -> &'static str {
        "rewrite-asset-references"
    }

    fn apply(&self, mut record: FileRecord) -> Result<FileRecord, TaskError> {
        let text = record.text().into_owned();
        let rewritten = REFERENCE.replace_all(&text, |caps: &regex::Captures| {
            let authored = &caps[3];
            match logical_key(authored).and_then(|key| self.manifest.resolve(&key)) {
                Some(physical) => format!(
                    "{}={}{}{}",
                    &caps[1],
                    &caps[2],
                    authored_reference(authored, physical),
                    &caps[2]
                ),
                None => caps[0].to_string(),
            }
        });
        record.set_text(rewritten.into_owned());
        Ok(record)
    }
}

struct MinifyHtml<'a> {
    minifier: &'a dyn Minifier,
}

impl Transform for MinifyHtml<'_> {
    fn name(&self) -> &'static str {
        "minify-html"
    }

    fn apply(&self, mut record: FileRecord) -> Result<FileRecord, TaskError> {
        let minified = self.minifier.minify(&record.text())?;
        record.set_text(minified);
        Ok(record)
    }
}

/// Build the template rewrite pipeline for a mode.
pub fn template_pipeline<'a>(
    mode: BuildMode,
    manifest: &'a AssetManifest,
    minifiers: &'a Minifiers,
) -> Pipeline<'a> {
    Pipeline::for_mode(
        mode,
        vec![Box::new(StripMarkers)],
        vec![
            Box::new(ReplaceRegions { manifest }),
            Box::new(RewriteReferences { manifest }),
            Box::new(MinifyHtml {
                minifier: minifiers.html.as_ref(),
            }),
        ],
    )
}

/// What the merger produced.
#[derive(Debug, Default)]
pub struct MergeOutput {
    /// Output-relative paths of bundles, copied members and staged templates.
    pub written: Vec<PathBuf>,
    /// Bundle entries (distribution mode only).
    pub manifest: AssetManifest,
    pub templates: usize,
}

struct ParsedTemplate {
    path: PathBuf,
    contents: Vec<u8>,
    regions: Vec<Region>,
}

/// A bundle target and where it was first declared.
struct Bundle {
    kind: RegionKind,
    members: Vec<String>,
    declared_in: PathBuf,
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| e == "html" || e == "htm")
}

/// Run the merger over `config.templates`.
///
/// `assets` holds the manifest entries produced by the asset tasks; bundle
/// members found there resolve to their fingerprinted files.
pub fn merge_templates(
    config: &BuildConfig,
    minifiers: &Minifiers,
    assets: &AssetManifest,
    output: &OutputTree,
) -> Result<MergeOutput, MergeError> {
    let files = FileSet::new(&config.templates, Selector::all()).resolve()?;
    let parsed = files
        .iter()
        .map(|rel| -> Result<ParsedTemplate, MergeError> {
            let contents = std::fs::read(config.templates.join(rel))?;
            let regions = if is_html(rel) {
                parse_regions(&String::from_utf8_lossy(&contents)).map_err(|source| {
                    MergeError::Region {
                        template: rel.clone(),
                        source,
                    }
                })?
            } else {
                Vec::new()
            };
            Ok(ParsedTemplate {
                path: rel.clone(),
                contents,
                regions,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let bundles = collect_bundles(&parsed)?;
    let mut result = MergeOutput::default();

    match config.mode {
        BuildMode::Distribution => {
            let built = bundles
                .par_iter()
                .map(|(target, bundle)| build_bundle(config, minifiers, assets, output, target, bundle))
                .collect::<Result<Vec<_>, MergeError>>()?;
            for (logical, entry) in built {
                result.written.push(PathBuf::from(&entry.path));
                result.manifest.insert(logical, entry);
            }
        }
        BuildMode::Development => {
            result.written.extend(expose_members(config, assets, output, &bundles)?);
        }
    }

    let mut combined = assets.clone();
    combined.extend(result.manifest.clone());
    let pipeline = template_pipeline(config.mode, &combined, minifiers);
    let staged = config
        .staged_templates
        .strip_prefix(&config.output)
        .unwrap_or(Path::new(STAGING_DIR))
        .to_path_buf();

    let staged_files = parsed
        .into_par_iter()
        .map(|template| -> Result<PathBuf, MergeError> {
            let target = staged.join(&template.path);
            let bytes = if is_html(&template.path) {
                pipeline
                    .run(FileRecord::new(template.path, template.contents))?
                    .contents
            } else {
                template.contents
            };
            output.write(&target, &bytes)?;
            Ok(target)
        })
        .collect::<Result<Vec<_>, _>>()?;

    result.templates = staged_files.len();
    result.written.extend(staged_files);
    info!(
        templates = result.templates,
        bundles = bundles.len(),
        mode = %config.mode,
        "Merged template assets"
    );
    Ok(result)
}

fn collect_bundles(parsed: &[ParsedTemplate]) -> Result<BTreeMap<String, Bundle>, MergeError> {
    let mut bundles: BTreeMap<String, Bundle> = BTreeMap::new();
    for template in parsed {
        for region in template.regions.iter().filter(|r| r.kind != RegionKind::Remove) {
            let key = logical_key(&region.target).ok_or_else(|| MergeError::Region {
                template: template.path.clone(),
                source: RegionError::ExternalTarget(region.target.clone()),
            })?;
            if let Some(existing) = bundles.get(&key) {
                if existing.members != region.members || existing.kind != region.kind {
                    return Err(MergeError::ConflictingBundle {
                        target: key,
                        first: existing.declared_in.clone(),
                        second: template.path.clone(),
                    });
                }
                continue;
            }
            bundles.insert(
                key,
                Bundle {
                    kind: region.kind,
                    members: region.members.clone(),
                    declared_in: template.path.clone(),
                },
            );
        }
    }
    Ok(bundles)
}

/// Locate a member file: manifest, then output tree, then app root.
fn resolve_member(config: &BuildConfig, assets: &AssetManifest, key: &str) -> Option<PathBuf> {
    if let Some(physical) = assets.resolve(key) {
        return Some(config.output.join(physical));
    }
    [config.output.join(key), config.app.join(key)]
        .into_iter()
        .find(|p| p.is_file())
}

fn build_bundle(
    config: &BuildConfig,
    minifiers: &Minifiers,
    assets: &AssetManifest,
    output: &OutputTree,
    target: &str,
    bundle: &Bundle,
) -> Result<(String, ManifestEntry), MergeError> {
    let mut sources = Vec::with_capacity(bundle.members.len());
    let mut concatenated = String::new();
    for member in &bundle.members {
        let key = logical_key(member).ok_or_else(|| MergeError::MissingAsset {
            template: bundle.declared_in.clone(),
            member: member.clone(),
        })?;
        let path = resolve_member(config, assets, &key).ok_or_else(|| MergeError::MissingAsset {
            template: bundle.declared_in.clone(),
            member: member.clone(),
        })?;
        let text = std::fs::read_to_string(&path)?;
        if !concatenated.is_empty() && !concatenated.ends_with('\n') {
            concatenated.push('\n');
        }
        concatenated.push_str(&text);
        sources.push(key);
    }

    let extension = Path::new(target)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| bundle.kind.name().to_string());
    let minifier = minifiers
        .for_extension(&extension)
        .ok_or_else(|| MergeError::NoMinifier(target.to_string()))?;
    let minified = minifier.minify(&concatenated)?;

    let fp = fingerprint(minified.as_bytes());
    let physical = fingerprinted_name(Path::new(target), &fp);
    output.write(&physical, minified.as_bytes())?;
    debug!(bundle = target, path = %physical.display(), members = sources.len(), "Wrote bundle");

    Ok((
        target.to_string(),
        ManifestEntry {
            path: to_slash(&physical),
            fingerprint: Some(fp),
            sources,
        },
    ))
}

/// Development: members that only exist under the app root are copied into
/// the output so the unbundled references resolve when served.
fn expose_members(
    config: &BuildConfig,
    assets: &AssetManifest,
    output: &OutputTree,
    bundles: &BTreeMap<String, Bundle>,
) -> Result<Vec<PathBuf>, MergeError> {
    let members: BTreeSet<(String, &Path)> = bundles
        .values()
        .flat_map(|b| b.members.iter().map(move |m| (m, b.declared_in.as_path())))
        .filter_map(|(m, declared)| logical_key(m).map(|k| (k, declared)))
        .collect();

    let mut copied = Vec::new();
    let mut seen = BTreeSet::new();
    for (key, declared_in) in members {
        if !seen.insert(key.clone()) {
            continue;
        }
        if assets.resolve(&key).is_some() || config.output.join(&key).is_file() {
            continue;
        }
        let source = config.app.join(&key);
        if !source.is_file() {
            return Err(MergeError::MissingAsset {
                template: declared_in.to_path_buf(),
                member: key,
            });
        }
        let target = PathBuf::from(&key);
        output.write(&target, &std::fs::read(&source)?)?;
        copied.push(target);
    }
    Ok(copied)
}
