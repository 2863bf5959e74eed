//! The default task set and the per-run build state.
//!
//! ```text
//! build ──deps──▶ cleanup
//!   └──starts──▶ assets ──▶ assets:styles, assets:scripts
//!                smith ──▶ templates ──▶ assets
//! publish ──▶ build
//! ```
//!
//! `build` clears the output first and then *starts* `assets` and `smith`,
//! so running `smith` or `assets:*` on their own (as the watcher does) never
//! clears anything. Every run gets a fresh [`BuildContext`]; tasks record
//! what they wrote into it and the run returns a [`BuildReport`].

use crate::assets::{self, GrassCompiler, StylesheetCompiler};
use crate::config::{BuildConfig, BuildMode};
use crate::content;
use crate::graph::{Action, GraphError, RunReport, TaskError, TaskGraph};
use crate::manifest::{AssetManifest, MANIFEST_FILENAME};
use crate::markup::{CommonMarkRenderer, MarkupRenderer};
use crate::merger;
use crate::minify::Minifiers;
use crate::output_tree::OutputTree;
use crate::publish::{PublishOutcome, Publisher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

pub const CLEANUP: &str = "cleanup";
pub const STYLES: &str = "assets:styles";
pub const SCRIPTS: &str = "assets:scripts";
pub const ASSETS: &str = "assets";
pub const TEMPLATES: &str = "templates";
pub const SMITH: &str = "smith";
pub const BUILD: &str = "build";
pub const PUBLISH: &str = "publish";

const NO_DEPS: [&str; 0] = [];

/// External tools the tasks call through their traits.
pub struct Collaborators {
    pub markup: Box<dyn MarkupRenderer>,
    pub styles: Box<dyn StylesheetCompiler>,
    pub minifiers: Minifiers,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            markup: Box::new(CommonMarkRenderer),
            styles: Box::new(GrassCompiler),
            minifiers: Minifiers::default(),
        }
    }
}

/// What one run did.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub mode: BuildMode,
    /// Tasks in completion order.
    pub executed: Vec<String>,
    /// Output-relative paths written by this run.
    pub written: Vec<PathBuf>,
    /// Recoverable per-file problems.
    pub warnings: Vec<(PathBuf, String)>,
    /// Fingerprinted assets (distribution builds).
    pub manifest: AssetManifest,
    pub published: Option<PublishOutcome>,
}

/// Shared state of a single run.
pub struct BuildContext {
    pub config: Arc<BuildConfig>,
    pub output: OutputTree,
    tools: Arc<Collaborators>,
    publisher: Option<Arc<dyn Publisher>>,
    manifest: Mutex<AssetManifest>,
    report: Mutex<BuildReport>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BuildContext {
    pub fn new(
        config: Arc<BuildConfig>,
        tools: Arc<Collaborators>,
        publisher: Option<Arc<dyn Publisher>>,
    ) -> Self {
        let report = BuildReport {
            mode: config.mode,
            ..BuildReport::default()
        };
        Self {
            output: OutputTree::new(&config.output),
            config,
            tools,
            publisher,
            manifest: Mutex::new(AssetManifest::new()),
            report: Mutex::new(report),
        }
    }

    fn record(&self, written: Vec<PathBuf>, manifest: AssetManifest) {
        lock(&self.report).written.extend(written);
        lock(&self.manifest).extend(manifest);
    }

    fn manifest_snapshot(&self) -> AssetManifest {
        lock(&self.manifest).clone()
    }

    fn save_manifest(&self) -> Result<(), TaskError> {
        let json = self.manifest_snapshot().to_json()?;
        let path = Path::new(MANIFEST_FILENAME);
        self.output.write(path, json.as_bytes())?;
        lock(&self.report).written.push(path.to_path_buf());
        Ok(())
    }

    fn into_report(self, run: RunReport) -> BuildReport {
        let mut report = self.report.into_inner().unwrap_or_else(PoisonError::into_inner);
        report.manifest = self
            .manifest
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        report.executed = run.executed;
        report
    }
}

fn styles_task(ctx: &BuildContext) -> Result<(), TaskError> {
    let out = assets::build_styles(&ctx.config, ctx.tools.styles.as_ref(), &ctx.output)?;
    ctx.record(out.written, out.manifest);
    Ok(())
}

fn scripts_task(ctx: &BuildContext) -> Result<(), TaskError> {
    let out = assets::build_scripts(&ctx.config, ctx.tools.minifiers.js.as_ref(), &ctx.output)?;
    ctx.record(out.written, out.manifest);
    Ok(())
}

fn templates_task(ctx: &BuildContext) -> Result<(), TaskError> {
    let assets = ctx.manifest_snapshot();
    let out = merger::merge_templates(&ctx.config, &ctx.tools.minifiers, &assets, &ctx.output)?;
    ctx.record(out.written, out.manifest);
    if ctx.config.mode.is_dist() {
        ctx.save_manifest()?;
    }
    Ok(())
}

fn smith_task(ctx: &BuildContext) -> Result<(), TaskError> {
    let out = content::smith(&ctx.config, ctx.tools.markup.as_ref(), &ctx.output)?;
    let mut report = lock(&ctx.report);
    report.written.extend(out.written);
    report.warnings.extend(out.warnings);
    Ok(())
}

fn publish_task(ctx: &BuildContext) -> Result<(), TaskError> {
    if !ctx.config.mode.is_dist() {
        return Err("publish requires a distribution build".into());
    }
    let publisher = ctx
        .publisher
        .as_ref()
        .ok_or("no publisher configured for this run")?;
    let outcome = publisher.publish(ctx.output.root())?;
    ctx.output.clear()?;
    lock(&ctx.report).published = Some(outcome);
    Ok(())
}

/// Register the default tasks.
pub fn task_graph() -> Result<TaskGraph<BuildContext>, GraphError> {
    let mut graph = TaskGraph::new();
    graph.register(
        CLEANUP,
        NO_DEPS,
        Some(Action::run(|ctx: &BuildContext| {
            ctx.output.clear()?;
            Ok(())
        })),
    )?;
    graph.register(STYLES, NO_DEPS, Some(Action::run(styles_task)))?;
    graph.register(SCRIPTS, NO_DEPS, Some(Action::run(scripts_task)))?;
    graph.register(ASSETS, [STYLES, SCRIPTS], None)?;
    graph.register(TEMPLATES, [ASSETS], Some(Action::run(templates_task)))?;
    graph.register(SMITH, [TEMPLATES], Some(Action::run(smith_task)))?;
    graph.register(BUILD, [CLEANUP], Some(Action::start([ASSETS, SMITH])))?;
    graph.register(PUBLISH, [BUILD], Some(Action::run(publish_task)))?;
    graph.validate()?;
    Ok(graph)
}

/// A configured project: its frozen configuration, tools and task graph.
pub struct Site {
    config: Arc<BuildConfig>,
    tools: Arc<Collaborators>,
    publisher: Option<Arc<dyn Publisher>>,
    graph: TaskGraph<BuildContext>,
}

impl Site {
    pub fn new(config: Arc<BuildConfig>) -> Result<Self, GraphError> {
        Self::with_tools(config, Collaborators::default())
    }

    pub fn with_tools(config: Arc<BuildConfig>, tools: Collaborators) -> Result<Self, GraphError> {
        Ok(Self {
            config,
            tools: Arc::new(tools),
            publisher: None,
            graph: task_graph()?,
        })
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn config(&self) -> &Arc<BuildConfig> {
        &self.config
    }

    pub fn graph(&self) -> &TaskGraph<BuildContext> {
        &self.graph
    }

    /// Run tasks (and their dependencies) with a fresh context.
    pub fn run(&self, names: &[&str]) -> Result<BuildReport, GraphError> {
        let ctx = BuildContext::new(
            self.config.clone(),
            self.tools.clone(),
            self.publisher.clone(),
        );
        let run = self.graph.run(names, &ctx)?;
        let report = ctx.into_report(run);
        info!(
            tasks = ?report.executed,
            files = report.written.len(),
            warnings = report.warnings.len(),
            "Run complete"
        );
        Ok(report)
    }

    pub fn build(&self) -> Result<BuildReport, GraphError> {
        self.run(&[BUILD])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::tests::MockCompiler;
    use crate::publish::DirectoryPublisher;
    use crate::test_helpers::{SampleProject, sample_config};
    use std::fs;

    fn site(project: &SampleProject, mode: BuildMode) -> Site {
        let tools = Collaborators {
            styles: Box::new(MockCompiler::default()),
            ..Collaborators::default()
        };
        Site::with_tools(sample_config(project, mode), tools).unwrap()
    }

    #[test]
    fn default_tasks_are_registered() {
        let graph = task_graph().unwrap();
        assert_eq!(
            graph.task_names(),
            vec![
                "assets",
                "assets:scripts",
                "assets:styles",
                "build",
                "cleanup",
                "publish",
                "smith",
                "templates"
            ]
        );
        assert_eq!(graph.dependencies(SMITH).unwrap(), ["templates"]);
    }

    #[test]
    fn smith_plan_orders_dependencies() {
        let graph = task_graph().unwrap();
        assert_eq!(
            graph.plan(&[SMITH]).unwrap(),
            vec![
                vec!["assets:scripts".to_string(), "assets:styles".to_string()],
                vec!["assets".to_string()],
                vec!["templates".to_string()],
                vec!["smith".to_string()],
            ]
        );
    }

    #[test]
    fn build_runs_every_task_once_in_order() {
        let project = SampleProject::new();
        let report = site(&project, BuildMode::Development).build().unwrap();

        let pos = |name: &str| report.executed.iter().position(|t| t == name).unwrap();
        assert_eq!(report.executed.len(), 7);
        assert!(pos(CLEANUP) < pos(STYLES));
        assert!(pos(STYLES) < pos(TEMPLATES));
        assert!(pos(SCRIPTS) < pos(TEMPLATES));
        assert!(pos(TEMPLATES) < pos(SMITH));
        assert_eq!(report.executed.last().unwrap(), BUILD);
    }

    #[test]
    fn styles_requested_with_build_survive_cleanup() {
        let project = SampleProject::new();
        let site = site(&project, BuildMode::Development);
        let report = site.run(&[STYLES, BUILD]).unwrap();

        let pos = |name: &str| report.executed.iter().position(|t| t == name).unwrap();
        assert!(pos(CLEANUP) < pos(STYLES));
        assert_eq!(report.executed.iter().filter(|t| *t == STYLES).count(), 1);
        assert!(site.config().output.join("styles/main.css").exists());
        assert!(site.config().output.join("index.html").exists());
    }

    #[test]
    fn build_clears_stale_output() {
        let project = SampleProject::new();
        let site = site(&project, BuildMode::Development);
        fs::create_dir_all(&site.config().output).unwrap();
        fs::write(site.config().output.join("stale.html"), "old").unwrap();

        site.build().unwrap();
        assert!(!site.config().output.join("stale.html").exists());
        assert!(site.config().output.join("index.html").exists());
        assert!(!site.config().staged_templates.exists());
    }

    #[test]
    fn incremental_smith_keeps_other_outputs() {
        let project = SampleProject::new();
        let site = site(&project, BuildMode::Development);
        site.build().unwrap();
        fs::write(site.config().output.join("keep.txt"), "x").unwrap();

        project.write("app/content/index.md", "---\ntitle: Changed\n---\n# Hi\n");
        let report = site.run(&[SMITH]).unwrap();
        assert!(!report.executed.contains(&CLEANUP.to_string()));
        assert!(site.config().output.join("keep.txt").exists());
        assert!(project
            .read_output(site.config(), "index.html")
            .contains("<title>Changed</title>"));
    }

    #[test]
    fn failing_template_stops_before_smith() {
        let project = SampleProject::new();
        project.write(
            "app/templates/broken.html",
            "<!-- build:css styles/x.css --><link href=\"a.css\">",
        );
        let site = site(&project, BuildMode::Development);
        let err = site.build().unwrap_err();
        assert!(matches!(&err, GraphError::TaskFailed { task, .. } if task == TEMPLATES));
        assert!(!site.config().output.join("index.html").exists());
    }

    #[test]
    fn dist_build_saves_manifest() {
        let project = SampleProject::new();
        let site = site(&project, BuildMode::Distribution);
        let report = site.build().unwrap();

        assert!(report.manifest.get("styles/main.css").is_some());
        assert!(report.manifest.get("styles/vendor.css").is_some());
        assert!(report.manifest.get("scripts/app.js").is_some());
        let saved = AssetManifest::load(&site.config().output).unwrap();
        assert_eq!(saved, report.manifest);
    }

    #[test]
    fn publish_requires_dist_mode() {
        let project = SampleProject::new();
        let target = project.root().join("public");
        let site = site(&project, BuildMode::Development)
            .with_publisher(Arc::new(DirectoryPublisher::new(&target)));
        let err = site.run(&[PUBLISH]).unwrap_err();
        assert!(matches!(&err, GraphError::TaskFailed { task, .. } if task == PUBLISH));
        assert!(!target.exists());
    }

    #[test]
    fn publish_hands_over_and_clears_output() {
        let project = SampleProject::new();
        let target = project.root().join("public");
        let site = site(&project, BuildMode::Distribution)
            .with_publisher(Arc::new(DirectoryPublisher::new(&target)));

        let report = site.run(&[PUBLISH]).unwrap();
        assert!(report.published.is_some());
        assert!(target.join("index.html").exists());
        assert!(target.join(MANIFEST_FILENAME).exists());
        assert!(fs::read_dir(&site.config().output).unwrap().next().is_none());
    }
}
