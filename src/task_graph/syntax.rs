//! Association of input syntax with construction actions.
//!
//! Syntax paths are `/`-separated, e.g. `Kernels/*` or `Variables/*/InitialCondition`. A `*`
//! segment in a registered path matches any single segment of a queried path.
use super::{TaskGraph, TaskGraphError};
use log::warn;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};

/// An action registered for a syntax path, together with the task it builds in, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub action: String,
    pub task: Option<String>,
}

/// Where a syntax association was registered. Used for diagnostics and documentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLineInfo {
    pub file: String,
    pub line: u32,
}

impl FileLineInfo {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// The registered syntax that a queried path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxMatch {
    /// The registered syntax path.
    pub registered: String,
    /// Whether the queried path is a proper parent of the registered syntax rather than a match
    /// of the full path.
    pub is_parent: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SyntaxTable {
    associated: BTreeMap<String, Vec<ActionInfo>>,
    // Keyed by (syntax, action, task)
    line_info: FxHashMap<(String, String, String), FileLineInfo>,
    deprecated: BTreeMap<String, String>,
    types: BTreeMap<String, BTreeSet<String>>,
    // action -> syntax, rebuilt on demand after any change to `associated`
    by_action: OnceCell<BTreeMap<String, Vec<String>>>,
}

impl SyntaxTable {
    fn invalidate(&mut self) {
        self.by_action = OnceCell::new();
    }

    fn by_action(&self) -> &BTreeMap<String, Vec<String>> {
        self.by_action.get_or_init(|| {
            let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for (syntax, infos) in &self.associated {
                for info in infos {
                    let entry = map.entry(info.action.clone()).or_default();
                    if !entry.contains(syntax) {
                        entry.push(syntax.clone());
                    }
                }
            }
            map
        })
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

impl TaskGraph {
    /// Associates an action (and optionally the task it builds in) with a syntax path.
    ///
    /// If a task is given, it must be registered.
    pub fn register_action_syntax(
        &mut self,
        action: &str,
        syntax: &str,
        task: Option<&str>,
        line_info: Option<FileLineInfo>,
    ) -> Result<(), TaskGraphError> {
        if let Some(task) = task {
            if !self.has_task(task) {
                return Err(TaskGraphError::UnknownTask(task.to_string()));
            }
        }
        let info = ActionInfo {
            action: action.to_string(),
            task: task.map(str::to_string),
        };
        let table = &mut self.syntax;
        let infos = table.associated.entry(syntax.to_string()).or_default();
        if !infos.contains(&info) {
            infos.push(info);
        }
        if let Some(line_info) = line_info {
            let key = (syntax.to_string(), action.to_string(), task.unwrap_or_default().to_string());
            table.line_info.insert(key, line_info);
        }
        table.invalidate();
        Ok(())
    }

    /// Removes every existing association of the action before registering it with the given
    /// syntax.
    pub fn replace_action_syntax(
        &mut self,
        action: &str,
        syntax: &str,
        task: Option<&str>,
        line_info: Option<FileLineInfo>,
    ) -> Result<(), TaskGraphError> {
        let table = &mut self.syntax;
        for infos in table.associated.values_mut() {
            infos.retain(|info| info.action != action);
        }
        table.associated.retain(|_, infos| !infos.is_empty());
        table.line_info.retain(|(_, a, _), _| a != action);
        table.invalidate();
        self.register_action_syntax(action, syntax, task, line_info)
    }

    /// Removes all actions associated with the syntax. Returns the names of the removed actions.
    pub fn remove_all_actions_for_syntax(&mut self, syntax: &str) -> Vec<String> {
        let table = &mut self.syntax;
        let removed = table
            .associated
            .remove(syntax)
            .unwrap_or_default()
            .into_iter()
            .map(|info| info.action)
            .collect();
        table.line_info.retain(|(s, _, _), _| s != syntax);
        table.invalidate();
        removed
    }

    /// Marks the syntax as deprecated, with a message shown to users of the syntax.
    pub fn deprecate_action_syntax(&mut self, syntax: &str, message: &str) {
        self.syntax
            .deprecated
            .insert(syntax.to_string(), message.to_string());
    }

    pub fn is_deprecated_syntax(&self, syntax: &str) -> bool {
        self.syntax.deprecated.contains_key(syntax)
    }

    pub fn deprecated_syntax_message(&self, syntax: &str) -> Result<&str, TaskGraphError> {
        self.syntax
            .deprecated
            .get(syntax)
            .map(String::as_str)
            .ok_or_else(|| TaskGraphError::NotDeprecated(syntax.to_string()))
    }

    /// Records that values of the given type are permitted under the syntax.
    pub fn register_syntax_type(&mut self, syntax: &str, type_name: &str) {
        self.syntax
            .types
            .entry(syntax.to_string())
            .or_default()
            .insert(type_name.to_string());
    }

    pub fn associated_types(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.syntax.types
    }

    /// The actions registered for exactly this syntax path, in registration order.
    pub fn actions(&self, syntax: &str) -> &[ActionInfo] {
        self.syntax
            .associated
            .get(syntax)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All (syntax, action) associations, ordered by syntax.
    pub fn associated_actions(&self) -> impl Iterator<Item = (&str, &ActionInfo)> {
        self.syntax
            .associated
            .iter()
            .flat_map(|(syntax, infos)| infos.iter().map(move |info| (syntax.as_str(), info)))
    }

    /// All syntax paths the action is registered with.
    pub fn syntax_by_action(&self, action: &str) -> &[String] {
        self.syntax
            .by_action()
            .get(action)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Same as [`syntax_by_action`](Self::syntax_by_action), excluding deprecated syntax.
    pub fn non_deprecated_syntax_by_action(&self, action: &str) -> Vec<&str> {
        self.syntax_by_action(action)
            .iter()
            .filter(|syntax| !self.is_deprecated_syntax(syntax))
            .map(String::as_str)
            .collect()
    }

    pub fn line_info(&self, syntax: &str, action: &str, task: Option<&str>) -> Option<&FileLineInfo> {
        let key = (syntax.to_string(), action.to_string(), task.unwrap_or_default().to_string());
        self.syntax.line_info.get(&key)
    }

    /// Finds the registered syntax that the given path belongs to.
    ///
    /// An exact registration always wins. Otherwise, among the registered patterns with the same
    /// number of segments that match the path, the one with the fewest wildcards wins; ties are
    /// broken in favor of the lexicographically greatest pattern. If no pattern matches the full
    /// path, a pattern of which the path is a proper prefix is returned with
    /// [`is_parent`](SyntaxMatch::is_parent) set, chosen by the same rules.
    pub fn is_associated(&self, path: &str) -> Option<SyntaxMatch> {
        if self.syntax.associated.contains_key(path) {
            return Some(SyntaxMatch {
                registered: path.to_string(),
                is_parent: false,
            });
        }

        let path_segments = segments(path);
        // (wildcards, pattern) of the best full match and the best parent match
        let mut best_full: Option<(usize, &str)> = None;
        let mut best_parent: Option<(usize, &str)> = None;

        // Reverse order, so that the first candidate found for a given number of wildcards is
        // the lexicographically greatest one
        for registered in self.syntax.associated.keys().rev() {
            let registered_segments = segments(registered);
            if path_segments.len() > registered_segments.len() {
                continue;
            }
            let mut wildcards = 0;
            let matches = path_segments
                .iter()
                .zip(&registered_segments)
                .all(|(real, reg)| {
                    if *reg == "*" {
                        wildcards += 1;
                        true
                    } else {
                        real == reg
                    }
                });
            if !matches {
                continue;
            }
            let best = if path_segments.len() == registered_segments.len() {
                &mut best_full
            } else {
                &mut best_parent
            };
            if best.map_or(true, |(w, _)| wildcards < w) {
                *best = Some((wildcards, registered.as_str()));
            }
        }

        best_full
            .map(|(_, registered)| (registered, false))
            .or(best_parent.map(|(_, registered)| (registered, true)))
            .map(|(registered, is_parent)| SyntaxMatch {
                registered: registered.to_string(),
                is_parent,
            })
    }

    /// Resolves the path to its registered syntax and returns the associated actions.
    ///
    /// Fails if no registered syntax matches the path.
    pub fn actions_for_path(&self, path: &str) -> Result<(SyntaxMatch, &[ActionInfo]), TaskGraphError> {
        let syntax_match = self
            .is_associated(path)
            .ok_or_else(|| TaskGraphError::UnregisteredSyntax(path.to_string()))?;
        if let Some(message) = self.syntax.deprecated.get(&syntax_match.registered) {
            warn!("Deprecated syntax '{}': {}", path, message);
        }
        let actions = self.actions(&syntax_match.registered);
        Ok((syntax_match, actions))
    }
}
