//! Registration and ordering of build tasks.
//!
//! A [`TaskGraph`] owns the set of named tasks that make up the construction pipeline of a
//! simulation, the partial order between them, which pluggable systems are permitted to create
//! objects during which task, and the association of input syntax with construction actions
//! (see [`syntax`]).
//!
//! The graph is an explicit value: it is constructed once, passed by reference to the code that
//! registers tasks and syntax, and finally resolved into an immutable [`TaskSchedule`].
use crate::dependency::{CyclicDependency, DependencyResolver};
use itertools::Itertools;
use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

pub mod syntax;

pub use syntax::{ActionInfo, FileLineInfo, SyntaxMatch};

/// A named stage of the build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    /// Whether a default action should be run if no action claims this task.
    pub auto_build: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskGraphError {
    /// The named task has not been registered.
    UnknownTask(String),
    /// The task was registered as a plain task and then again with an owning system.
    ConflictingRegistration { task: String, system: String },
    /// The dependencies do not admit an ordering. The chain starts and ends with the same task.
    CyclicDependency { cycle: Vec<String> },
    /// No registered syntax matches the given path.
    UnregisteredSyntax(String),
    /// A deprecation message was requested for syntax that is not deprecated.
    NotDeprecated(String),
    /// A dependency set specification could not be parsed.
    MalformedDependencySets(String),
}

impl Display for TaskGraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTask(task) => write!(f, "'{}' is not a registered task name", task),
            Self::ConflictingRegistration { task, system } => write!(
                f,
                "Task '{}' is already registered. Use append_owning_system to associate it with '{}'",
                task, system
            ),
            Self::CyclicDependency { cycle } => {
                write!(f, "Cyclic dependency detected in task graph: {}", cycle.iter().join(" <- "))
            }
            Self::UnregisteredSyntax(path) => write!(
                f,
                "Syntax '{}' does not have an associated action. The action or section name is \
                 likely misspelled",
                path
            ),
            Self::NotDeprecated(syntax) => write!(f, "Syntax '{}' is not deprecated", syntax),
            Self::MalformedDependencySets(reason) => write!(f, "Malformed dependency sets: {}", reason),
        }
    }
}

impl Error for TaskGraphError {}

impl From<CyclicDependency<String>> for TaskGraphError {
    fn from(err: CyclicDependency<String>) -> Self {
        Self::CyclicDependency {
            cycle: err.into_cycle(),
        }
    }
}

/// Registered tasks, their dependencies and syntax associations.
#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    task_index: FxHashMap<String, usize>,
    dependencies: DependencyResolver<String>,
    // (owning system, task) pairs in registration order
    owning_systems: Vec<(String, String)>,
    deprecated_systems: BTreeSet<String>,
    syntax: syntax::SyntaxTable,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes all tasks, dependencies and syntax associations.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Registers a task. Registering an already registered task is a no-op.
    pub fn register_task(&mut self, name: &str, auto_build: bool) {
        if self.task_index.contains_key(name) {
            return;
        }
        self.task_index.insert(name.to_string(), self.tasks.len());
        self.tasks.push(Task {
            name: name.to_string(),
            auto_build,
        });
        self.dependencies.add_item(name.to_string());
    }

    /// Registers a task together with a system that may create objects during the task.
    ///
    /// Repeating an identical registration is a no-op. Fails if the task is already registered
    /// without this system; use [`append_owning_system`](Self::append_owning_system) to add
    /// further systems to an existing task.
    pub fn register_task_for_system(&mut self, name: &str, system: &str, auto_build: bool) -> Result<(), TaskGraphError> {
        if self.is_owning_system_pair(system, name) {
            return Ok(());
        }
        if self.has_task(name) {
            return Err(TaskGraphError::ConflictingRegistration {
                task: name.to_string(),
                system: system.to_string(),
            });
        }
        self.register_task(name, auto_build);
        self.owning_systems
            .push((system.to_string(), name.to_string()));
        Ok(())
    }

    /// Associates an additional owning system with an existing task.
    pub fn append_owning_system(&mut self, name: &str, system: &str) -> Result<(), TaskGraphError> {
        if !self.has_task(name) {
            return Err(TaskGraphError::UnknownTask(name.to_string()));
        }
        if !self.is_owning_system_pair(system, name) {
            self.owning_systems
                .push((system.to_string(), name.to_string()));
        }
        Ok(())
    }

    /// Same as [`append_owning_system`](Self::append_owning_system), but marks the system as
    /// deprecated.
    pub fn append_owning_system_deprecated(&mut self, name: &str, system: &str) -> Result<(), TaskGraphError> {
        self.append_owning_system(name, system)?;
        self.deprecated_systems.insert(system.to_string());
        Ok(())
    }

    pub fn is_deprecated_owning_system(&self, system: &str) -> bool {
        self.deprecated_systems.contains(system)
    }

    /// Returns whether the given system may create objects during the given task.
    pub fn verify_owning_system(&self, system: &str, task: &str) -> bool {
        self.is_owning_system_pair(system, task)
    }

    /// The systems permitted to create objects during the given task, in registration order.
    pub fn owning_systems<'a>(&'a self, task: &'a str) -> impl 'a + Iterator<Item = &'a str> {
        self.owning_systems
            .iter()
            .filter(move |(_, t)| t == task)
            .map(|(system, _)| system.as_str())
    }

    fn is_owning_system_pair(&self, system: &str, task: &str) -> bool {
        self.owning_systems
            .iter()
            .any(|(s, t)| s == system && t == task)
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.task_index.contains_key(name)
    }

    /// Registered tasks in registration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.task_index.get(name).map(|&idx| &self.tasks[idx])
    }

    /// Whether a default action should be run for the task if no action claims it.
    pub fn should_auto_build(&self, name: &str) -> Result<bool, TaskGraphError> {
        self.task(name)
            .map(|task| task.auto_build)
            .ok_or_else(|| TaskGraphError::UnknownTask(name.to_string()))
    }

    /// Declares that `dependent` must run after `prerequisite`.
    ///
    /// The dependent task must be registered. The prerequisite becomes part of the graph even
    /// if it is not (yet) registered. Cycles are only detected when an ordering is requested.
    pub fn add_dependency(&mut self, dependent: &str, prerequisite: &str) -> Result<(), TaskGraphError> {
        if !self.has_task(dependent) {
            return Err(TaskGraphError::UnknownTask(dependent.to_string()));
        }
        self.dependencies
            .add_edge(prerequisite.to_string(), dependent.to_string());
        Ok(())
    }

    /// Adds dependencies from a grouped specification such as `"(a, b) (c) (d, e)"`.
    ///
    /// Every task in a group depends on every task in the preceding group. Groups may be
    /// separated by arbitrary whitespace, and names within a group by commas and/or whitespace.
    pub fn add_dependency_sets(&mut self, sets: &str) -> Result<(), TaskGraphError> {
        let groups = parse_dependency_sets(sets)?;
        for (previous, current) in groups.iter().tuple_windows() {
            for dependent in current {
                for prerequisite in previous {
                    self.add_dependency(dependent, prerequisite)?;
                }
            }
        }
        Ok(())
    }

    /// Removes all prerequisites of the given task.
    pub fn delete_task_dependencies(&mut self, task: &str) {
        self.dependencies.remove_dependencies(&task.to_string());
    }

    /// Removes all dependencies between tasks, keeping the tasks themselves.
    pub fn clear_task_dependencies(&mut self) {
        self.dependencies.clear_dependencies();
    }

    /// The direct prerequisites of the given task.
    pub fn prerequisites<'a>(&'a self, task: &str) -> impl 'a + Iterator<Item = &'a str> {
        self.dependencies
            .prerequisites(&task.to_string())
            .map(String::as_str)
            .collect_vec()
            .into_iter()
    }

    /// Returns whether `dependent` (transitively) depends on `prerequisite`.
    pub fn depends_on(&self, dependent: &str, prerequisite: &str) -> bool {
        self.dependencies
            .depends_on(&dependent.to_string(), &prerequisite.to_string())
    }

    /// All tasks, ordered such that every prerequisite precedes its dependents.
    pub fn sorted_tasks(&self) -> Result<Vec<String>, TaskGraphError> {
        Ok(self.dependencies.sorted()?)
    }

    /// Tasks grouped into levels that may be processed one after the other, where tasks within
    /// one level do not depend on each other.
    pub fn sorted_task_levels(&self) -> Result<Vec<Vec<String>>, TaskGraphError> {
        Ok(self.dependencies.sorted_levels()?)
    }

    /// Resolves the graph into an immutable schedule.
    pub fn schedule(&self) -> Result<TaskSchedule, TaskGraphError> {
        let levels = self.sorted_task_levels()?;
        let auto_build = levels
            .iter()
            .flatten()
            .map(|name| self.task(name).map(|t| t.auto_build).unwrap_or(false))
            .collect();
        debug!(
            "Scheduled {} tasks in {} levels",
            levels.iter().map(Vec::len).sum::<usize>(),
            levels.len()
        );
        Ok(TaskSchedule { levels, auto_build })
    }
}

fn parse_dependency_sets(sets: &str) -> Result<Vec<Vec<String>>, TaskGraphError> {
    let mut groups = Vec::new();
    let mut rest = sets.trim();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('(').ok_or_else(|| {
            TaskGraphError::MalformedDependencySets(format!("expected '(' at '{}'", rest))
        })?;
        let end = inner.find(')').ok_or_else(|| {
            TaskGraphError::MalformedDependencySets(format!("unclosed group at '{}'", rest))
        })?;
        let group: Vec<String> = inner[..end]
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if group.iter().any(|name| name.contains('(')) {
            return Err(TaskGraphError::MalformedDependencySets(format!(
                "nested group in '{}'",
                &inner[..end]
            )));
        }
        if !group.is_empty() {
            groups.push(group);
        }
        rest = inner[end + 1..].trim_start();
    }
    Ok(groups)
}

/// An immutable, resolved ordering of tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSchedule {
    levels: Vec<Vec<String>>,
    // Flag per task in flattened order
    auto_build: Vec<bool>,
}

impl TaskSchedule {
    /// Tasks in execution order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().flatten().map(String::as_str)
    }

    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.auto_build.len()
    }

    pub fn is_empty(&self) -> bool {
        self.auto_build.is_empty()
    }

    /// Tasks in execution order, together with their auto-build flag.
    ///
    /// Prerequisites that were never registered as tasks are reported with `auto_build == false`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.tasks().zip(self.auto_build.iter().copied())
    }
}
