//! Named-task registry and dependency-ordered execution.
//!
//! A [`TaskGraph`] holds tasks by name. Each task declares the tasks it
//! depends on and optionally an [`Action`]. Running a set of names executes
//! the transitive dependency closure exactly once per task, dependencies first.
//!
//! ## Execution model
//!
//! The closure is split into levels: a task's level is one more than the
//! deepest level among its dependencies. Levels run in order; the tasks of a
//! level have no dependency relation to each other and run concurrently on the
//! rayon pool.
//!
//! ```text
//! level 0   cleanup   assets:styles   assets:scripts
//! level 1   assets
//! level 2   templates
//! level 3   smith
//! ```
//!
//! ## Failure policy
//!
//! Every task already started in a level is allowed to finish. If any of them
//! failed, no later level starts and the first failure is returned. Tasks that
//! depend on a failed task therefore never start.
//!
//! ## Start actions
//!
//! Besides a closure, an action can be [`Action::Start`]: once the task's
//! dependencies are done it starts another set of tasks, as a nested run that
//! shares the outer run's bookkeeping. A task reached from both the outer and
//! the nested run still executes once. A requested task that some start action
//! in the run will start is left to that nested run, so it never overtakes the
//! start task's dependencies.
//!
//! Nothing is cached between calls to [`TaskGraph::run`]: each call executes
//! its whole resolved set again.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Error type returned by task actions. Any module error converts with `?`.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// A task body. Receives the shared context of the run.
pub type TaskFn<C> = Box<dyn Fn(&C) -> Result<(), TaskError> + Send + Sync>;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),
    #[error("Unknown task '{0}'")]
    UnknownTask(String),
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    #[error("Task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: TaskError,
    },
}

/// What a task does once its dependencies have completed.
pub enum Action<C> {
    /// Run a closure.
    Run(TaskFn<C>),
    /// Start other tasks.
    Start(Vec<String>),
}

impl<C> Action<C> {
    pub fn run(f: impl Fn(&C) -> Result<(), TaskError> + Send + Sync + 'static) -> Self {
        Action::Run(Box::new(f))
    }

    pub fn start<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Action::Start(names.into_iter().map(Into::into).collect())
    }
}

struct Task<C> {
    dependencies: Vec<String>,
    action: Option<Action<C>>,
}

impl<C> Task<C> {
    /// Dependencies plus start targets: every edge that can lead to execution.
    fn edges(&self) -> impl Iterator<Item = &String> {
        let started: &[String] = match &self.action {
            Some(Action::Start(names)) => names,
            _ => &[],
        };
        self.dependencies.iter().chain(started.iter())
    }
}

/// Tasks executed by one [`TaskGraph::run`], in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub executed: Vec<String>,
}

#[derive(Default)]
struct RunState {
    done: HashSet<String>,
    report: RunReport,
}

/// Registry of named tasks, built once and then run any number of times.
pub struct TaskGraph<C> {
    tasks: BTreeMap<String, Task<C>>,
}

impl<C> Default for TaskGraph<C> {
    fn default() -> Self {
        Self {
            tasks: BTreeMap::new(),
        }
    }
}

impl<C: Sync> TaskGraph<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Duplicate dependency names are dropped, first one wins.
    pub fn register<S: Into<String>>(
        &mut self,
        name: &str,
        dependencies: impl IntoIterator<Item = S>,
        action: Option<Action<C>>,
    ) -> Result<(), GraphError> {
        if self.tasks.contains_key(name) {
            return Err(GraphError::DuplicateTask(name.to_string()));
        }
        let mut seen = HashSet::new();
        let dependencies = dependencies
            .into_iter()
            .map(Into::into)
            .filter(|d: &String| seen.insert(d.clone()))
            .collect();
        self.tasks.insert(
            name.to_string(),
            Task {
                dependencies,
                action,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    /// Declared dependencies of a task, in registration order.
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.tasks.get(name).map(|t| t.dependencies.as_slice())
    }

    /// Tasks started by a task's action; empty for closures and grouping tasks.
    pub fn started(&self, name: &str) -> &[String] {
        match self.tasks.get(name).and_then(|t| t.action.as_ref()) {
            Some(Action::Start(names)) => names,
            _ => &[],
        }
    }

    /// Check that every referenced task exists and that there is no cycle.
    pub fn validate(&self) -> Result<(), GraphError> {
        for (name, task) in &self.tasks {
            if let Some(missing) = task.edges().find(|d| !self.tasks.contains_key(*d)) {
                return Err(GraphError::UnknownDependency {
                    task: name.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit<'a, C>(
            name: &'a str,
            tasks: &'a BTreeMap<String, Task<C>>,
            marks: &mut HashMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Result<(), GraphError> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| *n == name).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    cycle.push(name.to_string());
                    return Err(GraphError::Cycle(cycle));
                }
                None => {}
            }
            marks.insert(name, Mark::Visiting);
            path.push(name);
            for next in tasks[name].edges() {
                visit(next, tasks, marks, path)?;
            }
            path.pop();
            marks.insert(name, Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for name in self.tasks.keys() {
            visit(name, &self.tasks, &mut marks, &mut Vec::new())?;
        }
        Ok(())
    }

    /// Resolve the names to execution levels without running anything.
    pub fn plan(&self, names: &[&str]) -> Result<Vec<Vec<String>>, GraphError> {
        self.validate()?;
        self.check_names(names)?;
        Ok(self.levels(&self.requested(names), &HashSet::new()))
    }

    /// Run the named tasks and their dependency closure.
    pub fn run(&self, names: &[&str], ctx: &C) -> Result<RunReport, GraphError> {
        self.validate()?;
        self.check_names(names)?;
        let mut state = RunState::default();
        self.run_set(&self.requested(names), ctx, &mut state)?;
        Ok(state.report)
    }

    fn check_names(&self, names: &[&str]) -> Result<(), GraphError> {
        match names.iter().find(|n| !self.tasks.contains_key(**n)) {
            Some(unknown) => Err(GraphError::UnknownTask(unknown.to_string())),
            None => Ok(()),
        }
    }

    /// Drop requested names that a start action reachable from the request
    /// will start itself.
    fn requested<'n>(&self, names: &[&'n str]) -> Vec<&'n str> {
        let mut closure: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = names.to_vec();
        while let Some(name) = stack.pop() {
            if closure.insert(name) {
                stack.extend(self.tasks[name].dependencies.iter().map(String::as_str));
            }
        }

        let mut covered: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = closure
            .iter()
            .flat_map(|name| self.started(name))
            .map(String::as_str)
            .collect();
        while let Some(name) = stack.pop() {
            if covered.insert(name) {
                stack.extend(self.tasks[name].edges().map(String::as_str));
            }
        }

        let mut seen = HashSet::new();
        names
            .iter()
            .copied()
            .filter(|name| !covered.contains(name) && seen.insert(*name))
            .collect()
    }

    /// Group the not-yet-done closure of `names` by dependency depth.
    fn levels(&self, names: &[&str], done: &HashSet<String>) -> Vec<Vec<String>> {
        fn depth<'a, C>(
            name: &'a str,
            tasks: &'a BTreeMap<String, Task<C>>,
            done: &HashSet<String>,
            memo: &mut HashMap<&'a str, usize>,
        ) -> usize {
            if let Some(d) = memo.get(name) {
                return *d;
            }
            let d = tasks[name]
                .dependencies
                .iter()
                .filter(|dep| !done.contains(*dep))
                .map(|dep| depth(dep, tasks, done, memo) + 1)
                .max()
                .unwrap_or(0);
            memo.insert(name, d);
            d
        }

        let mut memo = HashMap::new();
        for name in names {
            if !done.contains(*name) {
                depth(name, &self.tasks, done, &mut memo);
            }
        }

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut ordered: Vec<(&str, usize)> = memo.into_iter().collect();
        ordered.sort();
        for (name, d) in ordered {
            if levels.len() <= d {
                levels.resize_with(d + 1, Vec::new);
            }
            levels[d].push(name.to_string());
        }
        levels
    }

    fn run_set(&self, names: &[&str], ctx: &C, state: &mut RunState) -> Result<(), GraphError> {
        for level in self.levels(names, &state.done) {
            // A nested run may have completed part of this level already.
            let pending: Vec<&String> = level.iter().filter(|n| !state.done.contains(*n)).collect();
            debug!(tasks = ?pending, "Running level");

            let results: Vec<(&String, Result<(), TaskError>)> = pending
                .par_iter()
                .filter_map(|name| match &self.tasks[name.as_str()].action {
                    Some(Action::Run(f)) => Some((*name, execute(name, f, ctx))),
                    _ => None,
                })
                .collect();

            let mut first_failure = None;
            for (name, result) in results {
                match result {
                    Ok(()) => {
                        state.done.insert(name.clone());
                        state.report.executed.push(name.clone());
                    }
                    Err(source) => {
                        warn!(task = %name, error = %source, "Task failed");
                        if first_failure.is_none() {
                            first_failure = Some(GraphError::TaskFailed {
                                task: name.clone(),
                                source,
                            });
                        }
                    }
                }
            }
            if let Some(err) = first_failure {
                return Err(err);
            }

            for name in pending {
                match &self.tasks[name.as_str()].action {
                    Some(Action::Run(_)) => {}
                    Some(Action::Start(started)) => {
                        state.done.insert(name.clone());
                        info!(task = %name, starts = ?started, "Starting tasks");
                        let started: Vec<&str> = started.iter().map(String::as_str).collect();
                        self.run_set(&started, ctx, state)?;
                        state.report.executed.push(name.clone());
                    }
                    None => {
                        state.done.insert(name.clone());
                        state.report.executed.push(name.clone());
                    }
                }
            }
        }
        Ok(())
    }
}

fn execute<C>(name: &str, f: &TaskFn<C>, ctx: &C) -> Result<(), TaskError> {
    let started = Instant::now();
    info!(task = %name, "Starting");
    let result = f(ctx);
    if result.is_ok() {
        info!(
            task = %name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Finished"
        );
    }
    result
}
