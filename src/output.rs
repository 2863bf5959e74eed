//! CLI output formatting.
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure.
//!
//! ## Build
//!
//! ```text
//! Build (distribution)
//! 001 cleanup
//! 002 assets:scripts
//! 003 assets:styles
//!     ...
//!
//! Assets
//!     scripts/app.js → scripts/app-5e6f7a8b.js
//!         Sources: scripts/lib/util.js, scripts/main.js
//!     styles/main.css → styles/main-1a2b3c4d.css
//!
//! Warnings
//!     blog/draft.md: invalid front matter: ...
//!
//! Wrote 14 files
//! ```
//!
//! ## Tasks
//!
//! ```text
//! assets ← assets:styles, assets:scripts
//! build ← cleanup
//!     starts: assets, smith
//! ```

use crate::graph::TaskGraph;
use crate::manifest::AssetManifest;
use crate::site::BuildReport;
use crate::watch::Notification;
use std::path::Path;

fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

/// Fingerprinted assets, one per line, with their bundle members.
pub fn format_manifest(manifest: &AssetManifest) -> Vec<String> {
    let mut lines = Vec::new();
    for (logical, entry) in manifest.iter() {
        lines.push(format!("{}{} \u{2192} {}", indent(1), logical, entry.path));
        if !entry.sources.is_empty() {
            lines.push(format!("{}Sources: {}", indent(2), entry.sources.join(", ")));
        }
    }
    lines
}

/// Summary of one run: executed tasks, assets, warnings, totals.
pub fn format_build_summary(report: &BuildReport) -> Vec<String> {
    let mut lines = vec![format!("Build ({})", report.mode)];
    for (i, task) in report.executed.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), task));
    }

    if !report.manifest.is_empty() {
        lines.push(String::new());
        lines.push("Assets".to_string());
        lines.extend(format_manifest(&report.manifest));
    }

    if !report.warnings.is_empty() {
        lines.push(String::new());
        lines.push("Warnings".to_string());
        for (path, warning) in &report.warnings {
            lines.push(format!("{}{}: {}", indent(1), path.display(), warning));
        }
    }

    lines.push(String::new());
    lines.push(format!("Wrote {}", plural(report.written.len(), "file")));
    if let Some(published) = &report.published {
        lines.push(format!(
            "Published {} \u{2192} {}",
            plural(published.files, "file"),
            published.destination
        ));
    }
    lines
}

pub fn print_build_summary(report: &BuildReport) {
    for line in format_build_summary(report) {
        println!("{}", line);
    }
}

/// Execution levels of a plan. Tasks on one level may run concurrently.
pub fn format_plan(levels: &[Vec<String>]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, level) in levels.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), level.join(", ")));
    }
    lines
}

pub fn print_plan(levels: &[Vec<String>]) {
    for line in format_plan(levels) {
        println!("{}", line);
    }
}

/// Registered tasks with their dependencies and started tasks.
pub fn format_tasks<C: Sync>(graph: &TaskGraph<C>) -> Vec<String> {
    let mut lines = Vec::new();
    for name in graph.task_names() {
        let deps = graph.dependencies(name).unwrap_or_default();
        if deps.is_empty() {
            lines.push(name.to_string());
        } else {
            lines.push(format!("{} \u{2190} {}", name, deps.join(", ")));
        }
        let started = graph.started(name);
        if !started.is_empty() {
            lines.push(format!("{}starts: {}", indent(1), started.join(", ")));
        }
    }
    lines
}

pub fn print_tasks<C: Sync>(graph: &TaskGraph<C>) {
    for line in format_tasks(graph) {
        println!("{}", line);
    }
}

pub fn format_notification(notification: &Notification) -> String {
    match notification {
        Notification::Started { binding, tasks } => {
            format!("[{}] rebuilding {}", binding, tasks.join(", "))
        }
        Notification::Finished { binding, elapsed } => {
            format!("[{}] done in {}ms", binding, elapsed.as_millis())
        }
        Notification::Failed { binding, error } => format!("[{}] failed: {}", binding, error),
    }
}

/// An error and its chain of causes.
pub fn format_error(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut lines = vec![format!("Error: {}", error)];
    let mut source = error.source();
    while let Some(cause) = source {
        lines.push(format!("{}Caused by: {}", indent(1), cause));
        source = cause.source();
    }
    lines
}

pub fn print_error(error: &(dyn std::error::Error + 'static)) {
    for line in format_error(error) {
        eprintln!("{}", line);
    }
}

/// Where the dev server is listening and what it serves.
pub fn format_serving(root: &Path, host: &str, port: u16) -> Vec<String> {
    vec![
        format!("Serving {}", root.display()),
        format!("{}http://{}:{}/", indent(1), host, port),
    ]
}

pub fn print_serving(root: &Path, host: &str, port: u16) {
    for line in format_serving(root, host, port) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildMode;
    use crate::graph::{Action, GraphError};
    use crate::manifest::ManifestEntry;
    use crate::publish::PublishOutcome;
    use std::path::PathBuf;
    use std::time::Duration;

    fn manifest() -> AssetManifest {
        let mut manifest = AssetManifest::new();
        manifest.insert(
            "styles/main.css",
            ManifestEntry {
                path: "styles/main-1a2b3c4d.css".into(),
                fingerprint: Some("1a2b3c4d".into()),
                sources: vec!["app/styles/main.scss".into()],
            },
        );
        manifest
    }

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(7), "007");
        assert_eq!(format_index(120), "120");
    }

    #[test]
    fn manifest_lines_show_sources() {
        assert_eq!(
            format_manifest(&manifest()),
            vec![
                "    styles/main.css \u{2192} styles/main-1a2b3c4d.css",
                "        Sources: app/styles/main.scss",
            ]
        );
    }

    #[test]
    fn dev_summary_lists_tasks_and_count() {
        let report = BuildReport {
            mode: BuildMode::Development,
            executed: vec!["cleanup".into(), "smith".into()],
            written: vec![PathBuf::from("index.html")],
            ..BuildReport::default()
        };
        assert_eq!(
            format_build_summary(&report),
            vec!["Build (development)", "001 cleanup", "002 smith", "", "Wrote 1 file"]
        );
    }

    #[test]
    fn dist_summary_includes_assets_warnings_and_publish() {
        let report = BuildReport {
            mode: BuildMode::Distribution,
            executed: vec!["publish".into()],
            written: vec![PathBuf::from("a"), PathBuf::from("b")],
            warnings: vec![(PathBuf::from("draft.md"), "bad front matter".into())],
            manifest: manifest(),
            published: Some(PublishOutcome {
                files: 2,
                destination: "public".into(),
            }),
        };
        let lines = format_build_summary(&report);
        assert_eq!(lines[0], "Build (distribution)");
        assert!(lines.contains(&"Assets".to_string()));
        assert!(lines.contains(&"    draft.md: bad front matter".to_string()));
        assert!(lines.contains(&"Wrote 2 files".to_string()));
        assert_eq!(lines.last().unwrap(), "Published 2 files \u{2192} public");
    }

    #[test]
    fn plan_lines_are_numbered_levels() {
        let levels = vec![
            vec!["assets:scripts".to_string(), "assets:styles".to_string()],
            vec!["assets".to_string()],
        ];
        assert_eq!(
            format_plan(&levels),
            vec!["001 assets:scripts, assets:styles", "002 assets"]
        );
    }

    #[test]
    fn task_listing_shows_edges() -> Result<(), GraphError> {
        let mut graph: TaskGraph<()> = TaskGraph::new();
        graph.register("a", [] as [&str; 0], Some(Action::run(|_| Ok(()))))?;
        graph.register("b", ["a"], None)?;
        graph.register("c", ["a"], Some(Action::start(["b"])))?;
        assert_eq!(
            format_tasks(&graph),
            vec!["a", "b \u{2190} a", "c \u{2190} a", "    starts: b"]
        );
        Ok(())
    }

    #[test]
    fn notification_lines() {
        let finished = Notification::Finished {
            binding: "smith".into(),
            elapsed: Duration::from_millis(42),
        };
        assert_eq!(format_notification(&finished), "[smith] done in 42ms");
        let failed = Notification::Failed {
            binding: "assets:styles".into(),
            error: "boom".into(),
        };
        assert_eq!(format_notification(&failed), "[assets:styles] failed: boom");
    }

    #[test]
    fn error_chain_is_listed() {
        let err = GraphError::TaskFailed {
            task: "smith".into(),
            source: "layout missing".into(),
        };
        assert_eq!(
            format_error(&err),
            vec![
                "Error: Task 'smith' failed: layout missing",
                "    Caused by: layout missing"
            ]
        );
    }
}
