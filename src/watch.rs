//! Incremental rebuilds driven by filesystem events.
//!
//! Each [`WatchBinding`] ties a set of input roots to the tasks that rebuild
//! their outputs. The [`WatchController`] keeps one state per binding:
//!
//! ```text
//! Idle ──event──▶ Running ──event──▶ RunningWithPending
//!  ▲                 │                      │
//!  └──run finished───┘ ◀──run again once────┘
//! ```
//!
//! Events for a running binding never start a second run of it; they are
//! folded into a single follow-up run. Different bindings run on their own
//! threads and may overlap. A failed run is reported through the
//! [`Notifier`] and the binding returns to `Idle`.

use crate::config::BuildConfig;
use crate::graph::TaskError;
use crate::output;
use crate::site::{SCRIPTS, SMITH, STYLES, Site};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("Nothing to watch: none of the bound directories exist")]
    NoRoots,
}

/// Input roots and the tasks rerun when anything under them changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchBinding {
    pub name: String,
    pub roots: Vec<PathBuf>,
    pub tasks: Vec<String>,
}

impl WatchBinding {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        roots: impl IntoIterator<Item = PathBuf>,
        tasks: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            roots: roots.into_iter().collect(),
            tasks: tasks.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Roots resolved through symlinks, so they compare equal to the paths
    /// the OS reports for events. Roots that do not exist are kept as given.
    fn canonical(mut self) -> Self {
        self.roots = self
            .roots
            .into_iter()
            .map(|root| std::fs::canonicalize(&root).unwrap_or(root))
            .collect();
        self
    }
}

/// The stock bindings: pages and layouts rebuild `smith`, stylesheets and
/// scripts rebuild only their own asset task.
pub fn default_bindings(config: &BuildConfig) -> Vec<WatchBinding> {
    vec![
        WatchBinding::new(
            SMITH,
            [config.content.clone(), config.templates.clone()],
            [SMITH],
        ),
        WatchBinding::new(STYLES, [config.styles.clone()], [STYLES]),
        WatchBinding::new(SCRIPTS, [config.scripts.clone()], [SCRIPTS]),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    Idle,
    Running,
    /// Running, and at least one event arrived since the run started.
    RunningWithPending,
}

/// What [`WatchController::handle`] did for a triggered binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Started,
    Coalesced,
}

/// Executes the tasks of a binding.
pub trait Rerun: Send + Sync {
    fn rerun(&self, tasks: &[String]) -> Result<(), TaskError>;
}

impl Rerun for Site {
    fn rerun(&self, tasks: &[String]) -> Result<(), TaskError> {
        let names: Vec<&str> = tasks.iter().map(String::as_str).collect();
        self.run(&names)?;
        Ok(())
    }
}

/// Progress of an incremental run, as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Started {
        binding: String,
        tasks: Vec<String>,
    },
    Finished {
        binding: String,
        elapsed: Duration,
    },
    Failed {
        binding: String,
        error: String,
    },
}

pub type NotifyError = Box<dyn std::error::Error + Send + Sync>;

/// Best-effort delivery of [`Notification`]s. Errors are logged and dropped.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification {
            Notification::Started { binding, tasks } => {
                info!(binding = %binding, tasks = ?tasks, "Rebuilding")
            }
            Notification::Finished { binding, elapsed } => {
                info!(binding = %binding, elapsed_ms = elapsed.as_millis() as u64, "Rebuilt")
            }
            Notification::Failed { binding, error } => {
                warn!(binding = %binding, error = %error, "Rebuild failed")
            }
        }
        Ok(())
    }
}

/// Prints one line per notification to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let line = output::format_notification(notification);
        writeln!(std::io::stdout().lock(), "{line}")?;
        Ok(())
    }
}

struct Shared {
    states: Mutex<Vec<BindingState>>,
    idle: Condvar,
}

impl Shared {
    fn states(&self) -> MutexGuard<'_, Vec<BindingState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Serializes reruns per binding.
pub struct WatchController {
    bindings: Arc<Vec<WatchBinding>>,
    rerun: Arc<dyn Rerun>,
    notifier: Arc<dyn Notifier>,
    shared: Arc<Shared>,
}

impl WatchController {
    pub fn new(
        bindings: Vec<WatchBinding>,
        rerun: Arc<dyn Rerun>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let shared = Shared {
            states: Mutex::new(vec![BindingState::Idle; bindings.len()]),
            idle: Condvar::new(),
        };
        Self {
            bindings: Arc::new(bindings),
            rerun,
            notifier,
            shared: Arc::new(shared),
        }
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// Every root of every binding, deduplicated.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self
            .bindings
            .iter()
            .flat_map(|b| b.roots.iter().cloned())
            .collect();
        roots.sort();
        roots.dedup();
        roots
    }

    pub fn state(&self, name: &str) -> Option<BindingState> {
        let index = self.bindings.iter().position(|b| b.name == name)?;
        Some(self.shared.states()[index])
    }

    /// Dispatch one batch of changed paths. Each binding matched by any path
    /// is triggered once, regardless of how many of its files changed.
    pub fn handle(&self, paths: &[PathBuf]) -> Vec<(String, Dispatch)> {
        let mut dispatched = Vec::new();
        for (index, binding) in self.bindings.iter().enumerate() {
            if !paths.iter().any(|p| binding.matches(p)) {
                continue;
            }
            let dispatch = {
                let mut states = self.shared.states();
                match states[index] {
                    BindingState::Idle => {
                        states[index] = BindingState::Running;
                        Dispatch::Started
                    }
                    BindingState::Running | BindingState::RunningWithPending => {
                        states[index] = BindingState::RunningWithPending;
                        Dispatch::Coalesced
                    }
                }
            };
            debug!(binding = %binding.name, ?dispatch, "Change detected");
            if dispatch == Dispatch::Started {
                self.spawn_worker(index);
            }
            dispatched.push((binding.name.clone(), dispatch));
        }
        dispatched
    }

    fn spawn_worker(&self, index: usize) {
        let bindings = Arc::clone(&self.bindings);
        let rerun = Arc::clone(&self.rerun);
        let notifier = Arc::clone(&self.notifier);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("watch-{}", bindings[index].name))
            .spawn(move || run_binding(&bindings[index], index, rerun.as_ref(), notifier.as_ref(), &shared));
        if let Err(e) = spawned {
            warn!(binding = %self.bindings[index].name, error = %e, "Could not start rebuild");
            self.shared.states()[index] = BindingState::Idle;
            self.shared.idle.notify_all();
        }
    }

    /// Block until every binding is idle. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let states = self.shared.states();
        let (_states, result) = self
            .shared
            .idle
            .wait_timeout_while(states, timeout, |states| {
                states.iter().any(|s| *s != BindingState::Idle)
            })
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}

fn send(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.notify(&notification) {
        debug!(error = %e, "Notification dropped");
    }
}

fn run_binding(
    binding: &WatchBinding,
    index: usize,
    rerun: &dyn Rerun,
    notifier: &dyn Notifier,
    shared: &Shared,
) {
    loop {
        send(
            notifier,
            Notification::Started {
                binding: binding.name.clone(),
                tasks: binding.tasks.clone(),
            },
        );
        let started = Instant::now();
        match rerun.rerun(&binding.tasks) {
            Ok(()) => send(
                notifier,
                Notification::Finished {
                    binding: binding.name.clone(),
                    elapsed: started.elapsed(),
                },
            ),
            Err(e) => send(
                notifier,
                Notification::Failed {
                    binding: binding.name.clone(),
                    error: e.to_string(),
                },
            ),
        }

        let mut states = shared.states();
        if states[index] == BindingState::RunningWithPending {
            states[index] = BindingState::Running;
            continue;
        }
        states[index] = BindingState::Idle;
        shared.idle.notify_all();
        return;
    }
}

/// Watch the site's input trees and rerun bound tasks until the process is
/// stopped.
pub fn watch(site: Arc<Site>, notifier: Arc<dyn Notifier>) -> Result<(), WatchError> {
    let config = Arc::clone(site.config());
    let bindings: Vec<WatchBinding> = default_bindings(&config)
        .into_iter()
        .map(WatchBinding::canonical)
        .collect();
    let controller = WatchController::new(bindings, site, notifier);

    let (tx, rx) = mpsc::channel::<Vec<PathBuf>>();
    let mut debouncer = new_debouncer(
        Duration::from_millis(config.debounce_ms),
        move |res: Result<Vec<DebouncedEvent>, notify::Error>| match res {
            Ok(events) => {
                let paths = events.into_iter().map(|event| event.path).collect();
                if tx.send(paths).is_err() {
                    debug!("Event receiver dropped");
                }
            }
            Err(e) => warn!(error = %e, "Filesystem watch error"),
        },
    )?;

    let mut watched = 0;
    for root in controller.roots() {
        if !root.is_dir() {
            warn!(path = %root.display(), "Not watching missing directory");
            continue;
        }
        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
        watched += 1;
    }
    if watched == 0 {
        return Err(WatchError::NoRoots);
    }
    info!(
        roots = watched,
        debounce_ms = config.debounce_ms,
        "Watching for changes"
    );

    for paths in rx {
        controller.handle(&paths);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    /// Records every rerun; optionally blocks until released.
    #[derive(Default)]
    struct MockRerun {
        calls: Mutex<Vec<Vec<String>>>,
        gate: Mutex<bool>,
        opened: Condvar,
        gated: bool,
        fail: AtomicBool,
    }

    impl MockRerun {
        fn gated() -> Self {
            Self {
                gated: true,
                ..Self::default()
            }
        }

        fn release(&self) {
            *self.gate.lock().unwrap() = true;
            self.opened.notify_all();
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Rerun for MockRerun {
        fn rerun(&self, tasks: &[String]) -> Result<(), TaskError> {
            self.calls.lock().unwrap().push(tasks.to_vec());
            if self.gated {
                let open = self.gate.lock().unwrap();
                drop(self.opened.wait_while(open, |open| !*open).unwrap());
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err("stylesheet failed to compile".into());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct BrokenNotifier;

    impl Notifier for BrokenNotifier {
        fn notify(&self, _: &Notification) -> Result<(), NotifyError> {
            Err("notification daemon not running".into())
        }
    }

    fn bindings() -> Vec<WatchBinding> {
        vec![
            WatchBinding::new(
                SMITH,
                [PathBuf::from("/p/app/content"), PathBuf::from("/p/app/templates")],
                [SMITH],
            ),
            WatchBinding::new(STYLES, [PathBuf::from("/p/app/styles")], [STYLES]),
            WatchBinding::new(SCRIPTS, [PathBuf::from("/p/app/scripts")], [SCRIPTS]),
        ]
    }

    fn controller(rerun: Arc<MockRerun>, notifier: Arc<dyn Notifier>) -> WatchController {
        WatchController::new(bindings(), rerun, notifier)
    }

    #[test]
    fn default_bindings_cover_each_input_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("app/templates")).unwrap();
        let config = BuildConfig::resolve(
            tmp.path(),
            crate::config::SiteConfig::default(),
            crate::config::Overrides::default(),
        )
        .unwrap();
        let bindings = default_bindings(&config);

        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].tasks, [SMITH]);
        assert!(bindings[0].matches(&config.content.join("index.md")));
        assert!(bindings[0].matches(&config.templates.join("default.html")));
        assert!(bindings[1].matches(&config.styles.join("main.scss")));
        assert!(!bindings[1].matches(&config.scripts.join("main.js")));
        assert_eq!(bindings[2].tasks, [SCRIPTS]);
    }

    #[test]
    fn style_and_script_changes_rerun_only_their_tasks() {
        let rerun = Arc::new(MockRerun::default());
        let watch = controller(rerun.clone(), Arc::new(LogNotifier));

        let dispatched = watch.handle(&[
            PathBuf::from("/p/app/styles/main.scss"),
            PathBuf::from("/p/app/scripts/main.js"),
        ]);
        assert_eq!(
            dispatched,
            vec![
                (STYLES.to_string(), Dispatch::Started),
                (SCRIPTS.to_string(), Dispatch::Started)
            ]
        );
        assert!(watch.wait_idle(WAIT));

        let mut calls = rerun.calls();
        calls.sort();
        assert_eq!(calls, vec![vec![SCRIPTS.to_string()], vec![STYLES.to_string()]]);
    }

    #[test]
    fn unrelated_paths_trigger_nothing() {
        let rerun = Arc::new(MockRerun::default());
        let watch = controller(rerun.clone(), Arc::new(LogNotifier));
        assert!(watch.handle(&[PathBuf::from("/p/site.toml")]).is_empty());
        assert!(rerun.calls().is_empty());
    }

    #[test]
    fn events_during_a_run_are_coalesced_into_one_follow_up() {
        let rerun = Arc::new(MockRerun::gated());
        let watch = controller(rerun.clone(), Arc::new(LogNotifier));
        let page = [PathBuf::from("/p/app/content/index.md")];

        assert_eq!(watch.handle(&page), vec![(SMITH.to_string(), Dispatch::Started)]);
        assert_eq!(watch.handle(&page), vec![(SMITH.to_string(), Dispatch::Coalesced)]);
        assert_eq!(watch.handle(&page), vec![(SMITH.to_string(), Dispatch::Coalesced)]);
        assert_eq!(watch.state(SMITH), Some(BindingState::RunningWithPending));

        rerun.release();
        assert!(watch.wait_idle(WAIT));
        assert_eq!(rerun.calls().len(), 2);
        assert_eq!(watch.state(SMITH), Some(BindingState::Idle));
    }

    #[test]
    fn busy_binding_does_not_block_others() {
        let rerun = Arc::new(MockRerun::gated());
        let watch = controller(rerun.clone(), Arc::new(LogNotifier));

        watch.handle(&[PathBuf::from("/p/app/templates/default.html")]);
        let dispatched = watch.handle(&[PathBuf::from("/p/app/styles/main.scss")]);
        assert_eq!(dispatched, vec![(STYLES.to_string(), Dispatch::Started)]);
        assert_eq!(watch.state(SMITH), Some(BindingState::Running));

        rerun.release();
        assert!(watch.wait_idle(WAIT));
    }

    #[test]
    fn failed_run_is_reported_and_binding_recovers() {
        let rerun = Arc::new(MockRerun::default());
        rerun.fail.store(true, Ordering::SeqCst);
        let notifier = Arc::new(RecordingNotifier::default());
        let watch = controller(rerun.clone(), notifier.clone());
        let styles = [PathBuf::from("/p/app/styles/main.scss")];

        watch.handle(&styles);
        assert!(watch.wait_idle(WAIT));
        {
            let seen = notifier.seen.lock().unwrap();
            assert!(matches!(&seen[0], Notification::Started { binding, .. } if binding == STYLES));
            assert!(matches!(
                &seen[1],
                Notification::Failed { error, .. } if error.contains("failed to compile")
            ));
        }
        assert_eq!(watch.state(STYLES), Some(BindingState::Idle));

        rerun.fail.store(false, Ordering::SeqCst);
        assert_eq!(watch.handle(&styles), vec![(STYLES.to_string(), Dispatch::Started)]);
        assert!(watch.wait_idle(WAIT));
        let seen = notifier.seen.lock().unwrap();
        assert!(matches!(seen.last(), Some(Notification::Finished { .. })));
    }

    #[test]
    fn notifier_failure_does_not_fail_the_run() {
        let rerun = Arc::new(MockRerun::default());
        let watch = controller(rerun.clone(), Arc::new(BrokenNotifier));
        watch.handle(&[PathBuf::from("/p/app/scripts/lib/util.js")]);
        assert!(watch.wait_idle(WAIT));
        assert_eq!(rerun.calls(), vec![vec![SCRIPTS.to_string()]]);
    }

    #[test]
    fn roots_are_deduplicated() {
        let mut list = bindings();
        list.push(WatchBinding::new("extra", [PathBuf::from("/p/app/styles")], [STYLES]));
        let watch = WatchController::new(list, Arc::new(MockRerun::default()), Arc::new(LogNotifier));
        assert_eq!(watch.roots().len(), 4);
    }
}
