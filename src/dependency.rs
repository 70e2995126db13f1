//! Insertion-ordered dependency resolution.
use itertools::Itertools;
use log::debug;
use rustc_hash::FxHashMap;
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Error returned when the dependency graph contains a cycle.
///
/// The cycle is stored as a chain starting and ending with the same item, where each item
/// depends on the item following it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclicDependency<K> {
    cycle: Vec<K>,
}

impl<K> CyclicDependency<K> {
    pub fn cycle(&self) -> &[K] {
        &self.cycle
    }

    pub fn into_cycle(self) -> Vec<K> {
        self.cycle
    }
}

impl<K: Display> Display for CyclicDependency<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cyclic dependency detected: {}", self.cycle.iter().join(" <- "))
    }
}

impl<K: Debug + Display> Error for CyclicDependency<K> {}

/// Resolves a set of items with pairwise dependencies into an ordering.
///
/// Items are kept in the order in which they were first seen, and every traversal follows that
/// order. Given identical sequences of insertions, the resolved orderings are therefore
/// identical, regardless of how the items hash.
#[derive(Debug, Clone)]
pub struct DependencyResolver<K> {
    items: Vec<K>,
    index: FxHashMap<K, usize>,
    // For each item, the indices of the items it depends on, in insertion order
    prerequisites: Vec<Vec<usize>>,
}

impl<K> Default for DependencyResolver<K> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: FxHashMap::default(),
            prerequisites: Vec::new(),
        }
    }
}

impl<K> DependencyResolver<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an item without any dependencies. Returns the insertion index of the item.
    ///
    /// Adding an item that is already present is a no-op.
    pub fn add_item(&mut self, item: K) -> usize {
        if let Some(&idx) = self.index.get(&item) {
            return idx;
        }
        let idx = self.items.len();
        self.index.insert(item.clone(), idx);
        self.items.push(item);
        self.prerequisites.push(Vec::new());
        idx
    }

    /// Declares that `dependent` must come after `prerequisite`.
    ///
    /// Both items are added if not already present. Cycles are not detected here, only
    /// when an ordering is requested.
    pub fn add_edge(&mut self, prerequisite: K, dependent: K) {
        let prerequisite = self.add_item(prerequisite);
        let dependent = self.add_item(dependent);
        let prerequisites = &mut self.prerequisites[dependent];
        if !prerequisites.contains(&prerequisite) {
            prerequisites.push(prerequisite);
        }
    }

    /// Removes all prerequisites of the given item. The item itself is kept.
    pub fn remove_dependencies(&mut self, item: &K) {
        if let Some(&idx) = self.index.get(item) {
            self.prerequisites[idx].clear();
        }
    }

    /// Removes all edges, keeping the items.
    pub fn clear_dependencies(&mut self) {
        for prerequisites in &mut self.prerequisites {
            prerequisites.clear();
        }
    }

    /// Removes all items and edges.
    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
        self.prerequisites.clear();
    }

    pub fn contains(&self, item: &K) -> bool {
        self.index.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in insertion order.
    pub fn items(&self) -> &[K] {
        &self.items
    }

    /// The direct prerequisites of the given item, in insertion order.
    pub fn prerequisites<'a>(&'a self, item: &K) -> impl 'a + Iterator<Item = &'a K> {
        self.index
            .get(item)
            .map(|&idx| self.prerequisites[idx].as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&p| &self.items[p])
    }

    /// Returns `true` if `dependent` depends on `prerequisite`, directly or transitively.
    pub fn depends_on(&self, dependent: &K, prerequisite: &K) -> bool {
        let (Some(&start), Some(&target)) = (self.index.get(dependent), self.index.get(prerequisite)) else {
            return false;
        };
        let mut visited = vec![false; self.items.len()];
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            for &p in &self.prerequisites[current] {
                if p == target {
                    return true;
                }
                if !visited[p] {
                    visited[p] = true;
                    stack.push(p);
                }
            }
        }
        false
    }

    /// Resolves the items into levels.
    ///
    /// Every item in a level has all of its prerequisites in earlier levels, and items
    /// within a level have no dependencies on each other. Each level consists of all items
    /// whose prerequisites have been placed, in insertion order.
    pub fn sorted_levels(&self) -> Result<Vec<Vec<K>>, CyclicDependency<K>> {
        let n = self.items.len();
        let mut remaining_prerequisites: Vec<usize> = self.prerequisites.iter().map(Vec::len).collect();
        let mut dependents = vec![Vec::new(); n];
        for (dependent, prerequisites) in self.prerequisites.iter().enumerate() {
            for &p in prerequisites {
                dependents[p].push(dependent);
            }
        }

        let mut placed = vec![false; n];
        let mut num_placed = 0;
        let mut levels = Vec::new();
        let mut ready: Vec<usize> = (0..n)
            .filter(|&i| remaining_prerequisites[i] == 0)
            .collect();

        while !ready.is_empty() {
            let mut next_ready = Vec::new();
            for &i in &ready {
                placed[i] = true;
                num_placed += 1;
                for &d in &dependents[i] {
                    remaining_prerequisites[d] -= 1;
                    if remaining_prerequisites[d] == 0 {
                        next_ready.push(d);
                    }
                }
            }
            levels.push(ready.iter().map(|&i| self.items[i].clone()).collect());
            next_ready.sort_unstable();
            ready = next_ready;
        }

        if num_placed < n {
            return Err(CyclicDependency {
                cycle: self.find_cycle(&placed),
            });
        }

        debug!("Resolved {} items into {} levels", n, levels.len());
        Ok(levels)
    }

    /// Resolves the items into a single order in which every prerequisite precedes its
    /// dependents.
    pub fn sorted(&self) -> Result<Vec<K>, CyclicDependency<K>> {
        Ok(self.sorted_levels()?.into_iter().flatten().collect())
    }

    /// Finds a cycle among the items that could not be placed.
    ///
    /// Every unplaced item has at least one unplaced prerequisite, so following unplaced
    /// prerequisites from any unplaced item must eventually revisit an item.
    fn find_cycle(&self, placed: &[bool]) -> Vec<K> {
        let start = placed
            .iter()
            .position(|&p| !p)
            .expect("Internal error: there must be an unplaced item");
        let mut position_in_path = vec![None; self.items.len()];
        let mut path = Vec::new();
        let mut current = start;
        loop {
            if let Some(pos) = position_in_path[current] {
                let mut cycle: Vec<K> = path[pos..]
                    .iter()
                    .map(|&i: &usize| self.items[i].clone())
                    .collect();
                cycle.push(self.items[current].clone());
                return cycle;
            }
            position_in_path[current] = Some(path.len());
            path.push(current);
            current = *self.prerequisites[current]
                .iter()
                .find(|&&p| !placed[p])
                .expect("Internal error: unplaced item must have an unplaced prerequisite");
        }
    }
}
