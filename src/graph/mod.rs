//! The URL graph.
//!
//! Nodes are resources keyed by absolute URL; edges are the references
//! found in their content. Each node keeps both directions
//! (`dependencies` and `dependents`) and every mutation keeps them
//! symmetric. Nodes that are neither entry points nor depended upon are
//! pruned, and pruning cascades through the dependencies they held.
//!
//! ```text
//! index.html ──► main.js ──► util.js
//!      │                        ▲
//!      └────────► other.js ─────┘
//! ```
//!
//! The graph has no interior locking; the kitchen wraps it in a mutex
//! and never holds that lock across an await.

mod reference;
mod url_info;


pub use reference::{Escape, Reference, ReferenceArena, ReferenceId, ReferenceKind};
pub use url_info::{CookState, DataBag, InlineSite, UrlInfo, UrlSubtype, UrlType};

use std::collections::VecDeque;
use std::collections::hash_map::Entry;

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use url::Url;

use crate::utils::timestamp::Timestamp;

/// Called with every node created by [`UrlGraph::reuse_or_create`].
pub type CreatedListener = Box<dyn Fn(&UrlInfo) + Send + Sync>;
/// Called with every batch of pruned nodes.
pub type PrunedListener = Box<dyn Fn(&PruneEvent) + Send + Sync>;
/// Fires at most once, when its node is pruned.
pub type PruneCallback = Box<dyn FnOnce(&PruneEvent) + Send>;

/// Nodes removed because nothing used them anymore.
#[derive(Debug)]
pub struct PruneEvent {
    /// Node whose reference update (or deletion) caused the pruning
    pub trigger: Url,
    pub pruned: Vec<UrlInfo>,
}

impl PruneEvent {
    pub fn urls(&self) -> impl Iterator<Item = &Url> {
        self.pruned.iter().map(|info| &info.url)
    }
}

/// A broken graph invariant.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphViolation {
    #[error("{from} depends on {to}, which does not list it as dependent")]
    MissingDependent { from: Url, to: Url },

    #[error("{to} lists {from} as dependent, but {from} does not depend on it")]
    MissingDependency { from: Url, to: Url },

    #[error("{from} has an edge to {to}, which is not in the graph")]
    DanglingEdge { from: Url, to: Url },

    #[error("{0} is unused but still in the graph")]
    Unused(Url),
}

// ============================================================================
// UrlGraph
// ============================================================================

#[derive(Default)]
pub struct UrlGraph {
    nodes: FxHashMap<Url, UrlInfo>,
    references: ReferenceArena,
    created_listeners: Vec<CreatedListener>,
    pruned_listeners: Vec<PrunedListener>,
    prune_callbacks: FxHashMap<Url, Vec<PruneCallback>>,
}

impl std::fmt::Debug for UrlGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlGraph")
            .field("nodes", &self.nodes.len())
            .field("references", &self.references.len())
            .finish()
    }
}

impl UrlGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.nodes.contains_key(url)
    }

    pub fn get(&self, url: &Url) -> Option<&UrlInfo> {
        self.nodes.get(url)
    }

    pub fn get_mut(&mut self, url: &Url) -> Option<&mut UrlInfo> {
        self.nodes.get_mut(url)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UrlInfo> {
        self.nodes.values()
    }

    pub fn references(&self) -> &ReferenceArena {
        &self.references
    }

    pub fn references_mut(&mut self) -> &mut ReferenceArena {
        &mut self.references
    }

    pub fn reference(&self, id: ReferenceId) -> Option<&Reference> {
        self.references.get(id)
    }

    /// References of `url` in source order, skipping released ids.
    pub fn references_of(&self, url: &Url) -> impl Iterator<Item = &Reference> {
        self.nodes
            .get(url)
            .into_iter()
            .flat_map(|info| info.references.iter())
            .filter_map(|id| self.references.get(*id))
    }

    /// Entry points, sorted for deterministic traversal.
    pub fn entry_points(&self) -> Vec<Url> {
        let mut entries: Vec<Url> = self
            .nodes
            .values()
            .filter(|info| info.is_entry_point)
            .map(|info| info.url.clone())
            .collect();
        entries.sort();
        entries
    }

    /// Every node reachable from an entry point, in depth-first preorder.
    ///
    /// Children are visited in reference order, so the result only depends
    /// on graph content, never on cook timing.
    pub fn reachable_from_entries(&self) -> Vec<Url> {
        let mut seen = FxHashSet::default();
        let mut order = Vec::new();
        for entry in self.entry_points() {
            let mut stack = vec![entry];
            while let Some(url) = stack.pop() {
                if !seen.insert(url.clone()) {
                    continue;
                }
                let children: Vec<Url> = self
                    .references_of(&url)
                    .filter(|r| r.is_dependency())
                    .filter_map(|r| r.url.clone())
                    .filter(|u| self.nodes.contains_key(u) && !seen.contains(u))
                    .collect();
                stack.extend(children.into_iter().rev());
                order.push(url);
            }
        }
        order
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    pub fn on_created(&mut self, listener: impl Fn(&UrlInfo) + Send + Sync + 'static) {
        self.created_listeners.push(Box::new(listener));
    }

    pub fn on_pruned(&mut self, listener: impl Fn(&PruneEvent) + Send + Sync + 'static) {
        self.pruned_listeners.push(Box::new(listener));
    }

    /// Run `callback` once if `url` is later pruned.
    pub fn once_pruned(&mut self, url: &Url, callback: impl FnOnce(&PruneEvent) + Send + 'static) {
        self.prune_callbacks
            .entry(url.clone())
            .or_default()
            .push(Box::new(callback));
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Existing node for `url`, or a new one (announced to `on_created`).
    pub fn reuse_or_create(&mut self, url: &Url) -> &mut UrlInfo {
        match self.nodes.entry(url.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let info = UrlInfo::new(url.clone());
                for listener in &self.created_listeners {
                    listener(&info);
                }
                entry.insert(info)
            }
        }
    }

    /// Remove `url` and prune whatever it alone kept alive.
    ///
    /// The removed node itself is not reported as pruned; nodes pruned in
    /// cascade are, with `url` as trigger.
    pub fn delete(&mut self, url: &Url) -> Option<UrlInfo> {
        self.prune_callbacks.remove(url);
        let info = self.detach(url)?;
        let orphans = self.unlink_dependencies(url, info.dependencies.iter());
        let mut pruned = Vec::new();
        self.prune_orphans(orphans, &mut pruned);
        self.emit_pruned(url, pruned);
        Some(info)
    }

    /// Replace the references of `url` and reconcile its edges.
    ///
    /// The new dependency set is computed before anything is mutated, so
    /// an update that changes nothing leaves the graph untouched.
    pub fn update_references(&mut self, url: &Url, references: Vec<ReferenceId>) {
        let Some(node) = self.nodes.get(url) else {
            for id in references {
                self.references.release(id);
            }
            return;
        };

        let mut dependencies = FxHashSet::default();
        let mut implicit = FxHashSet::default();
        for reference in references.iter().filter_map(|id| self.references.get(*id)) {
            let Some(target) = &reference.url else {
                continue;
            };
            if reference.is_implicit {
                implicit.insert(target.clone());
            } else if !reference.is_resource_hint && target != url {
                dependencies.insert(target.clone());
            }
        }
        // implicit urls of inline children stay with the parent
        for child in dependencies.iter().filter_map(|d| self.nodes.get(d)) {
            if child.is_inline {
                implicit.extend(child.implicit_urls.iter().cloned());
            }
        }

        let added: Vec<Url> = dependencies.difference(&node.dependencies).cloned().collect();
        let removed: Vec<Url> = node.dependencies.difference(&dependencies).cloned().collect();
        let inline_parent = node
            .inline_site
            .as_ref()
            .filter(|_| node.is_inline)
            .map(|site| site.parent_url.clone());
        let kept = self.chained(&references);
        let previous = match self.nodes.get_mut(url) {
            Some(node) => std::mem::take(&mut node.references),
            None => Vec::new(),
        };

        for dependency in &added {
            let node = self.reuse_or_create(dependency);
            node.dependents.insert(url.clone());
            if node.is_requested_entry {
                node.is_requested_entry = false;
                node.is_entry_point = false;
            }
        }
        if let Some(node) = self.nodes.get_mut(url) {
            node.dependencies = dependencies;
            node.implicit_urls = implicit.clone();
            node.references = references;
        }
        if let Some(parent) = inline_parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.implicit_urls.extend(implicit);
        }
        for id in previous {
            if !kept.contains(&id) {
                self.references.release(id);
            }
        }

        let orphans = self.unlink_dependencies(url, removed.iter());
        let mut pruned = Vec::new();
        self.prune_orphans(orphans, &mut pruned);
        self.emit_pruned(url, pruned);

        debug_assert_eq!(self.check_symmetry(), Ok(()));
    }

    /// Mark `url` (and whatever embeds it) as needing recomputation.
    ///
    /// Walks to inline dependencies unconditionally and to dependents
    /// unless `stop_at` accepts them; nodes that list `url` among their
    /// implicit urls are marked too. Returns the marked URLs.
    pub fn consider_modified(
        &mut self,
        url: &Url,
        timestamp: Timestamp,
        stop_at: impl Fn(&UrlInfo) -> bool,
    ) -> Vec<Url> {
        let mut stack = vec![url.clone()];
        stack.extend(
            self.nodes
                .values()
                .filter(|info| info.implicit_urls.contains(url))
                .map(|info| info.url.clone()),
        );

        let mut visited = FxHashSet::default();
        let mut marked = Vec::new();
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(node) = self.nodes.get_mut(&current) else {
                continue;
            };
            node.invalidate(timestamp);
            let dependencies: Vec<Url> = node.dependencies.iter().cloned().collect();
            let dependents: Vec<Url> = node.dependents.iter().cloned().collect();
            marked.push(current);

            stack.extend(
                dependencies
                    .into_iter()
                    .filter(|d| self.nodes.get(d).is_some_and(|n| n.is_inline)),
            );
            stack.extend(
                dependents
                    .into_iter()
                    .filter(|d| self.nodes.get(d).is_some_and(|n| !stop_at(n))),
            );
        }
        marked
    }

    /// Nearest node above `url` (breadth-first over dependents) matching `predicate`.
    pub fn find_dependent(&self, url: &Url, predicate: impl Fn(&UrlInfo) -> bool) -> Option<&UrlInfo> {
        let mut queue: VecDeque<&Url> = VecDeque::new();
        let mut seen: FxHashSet<&Url> = FxHashSet::default();
        let start = self.nodes.get(url)?;
        queue.extend(sorted(&start.dependents));
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            if predicate(node) {
                return Some(node);
            }
            queue.extend(sorted(&node.dependents));
        }
        None
    }

    /// Delete every node that is neither an entry point nor depended upon.
    pub fn prune_unused(&mut self) -> usize {
        let mut unused: Vec<Url> = self
            .nodes
            .values()
            .filter(|info| !info.is_used())
            .map(|info| info.url.clone())
            .collect();
        unused.sort();

        let before = self.nodes.len();
        for url in unused {
            if self.nodes.get(&url).is_some_and(|info| !info.is_used()) {
                self.prune_callbacks.remove(&url);
                self.delete(&url);
            }
        }
        before - self.nodes.len()
    }

    /// Check that every edge is recorded on both ends.
    pub fn check_symmetry(&self) -> Result<(), GraphViolation> {
        for (url, node) in &self.nodes {
            for dependency in &node.dependencies {
                let Some(target) = self.nodes.get(dependency) else {
                    return Err(GraphViolation::DanglingEdge {
                        from: url.clone(),
                        to: dependency.clone(),
                    });
                };
                if !target.dependents.contains(url) {
                    return Err(GraphViolation::MissingDependent {
                        from: url.clone(),
                        to: dependency.clone(),
                    });
                }
            }
            for dependent in &node.dependents {
                let Some(source) = self.nodes.get(dependent) else {
                    return Err(GraphViolation::DanglingEdge {
                        from: dependent.clone(),
                        to: url.clone(),
                    });
                };
                if !source.dependencies.contains(url) {
                    return Err(GraphViolation::MissingDependency {
                        from: dependent.clone(),
                        to: url.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Symmetry plus: no unused node survives. Holds after `prune_unused`.
    pub fn check_pruned(&self) -> Result<(), GraphViolation> {
        self.check_symmetry()?;
        match self.nodes.values().find(|info| !info.is_used()) {
            Some(info) => Err(GraphViolation::Unused(info.url.clone())),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Remove a node, its incoming edges and its references.
    fn detach(&mut self, url: &Url) -> Option<UrlInfo> {
        let info = self.nodes.remove(url)?;
        for dependent in &info.dependents {
            if let Some(node) = self.nodes.get_mut(dependent) {
                node.dependencies.remove(url);
            }
        }
        for id in &info.references {
            self.references.release(*id);
        }
        Some(info)
    }

    /// Drop `owner` from each dependency's dependents; return the ones left unused.
    fn unlink_dependencies<'a>(&mut self, owner: &Url, dependencies: impl Iterator<Item = &'a Url>) -> Vec<Url> {
        let mut orphans = Vec::new();
        for dependency in dependencies {
            if let Some(node) = self.nodes.get_mut(dependency) {
                node.dependents.remove(owner);
                if !node.is_used() {
                    orphans.push(dependency.clone());
                }
            }
        }
        orphans
    }

    fn prune_orphans(&mut self, mut stack: Vec<Url>, pruned: &mut Vec<UrlInfo>) {
        while let Some(url) = stack.pop() {
            if self.nodes.get(&url).is_none_or(UrlInfo::is_used) {
                continue;
            }
            let Some(info) = self.detach(&url) else {
                continue;
            };
            stack.extend(self.unlink_dependencies(&url, info.dependencies.iter()));
            pruned.push(info);
        }
    }

    fn emit_pruned(&mut self, trigger: &Url, pruned: Vec<UrlInfo>) {
        if pruned.is_empty() {
            return;
        }
        let event = PruneEvent {
            trigger: trigger.clone(),
            pruned,
        };
        for info in &event.pruned {
            for callback in self.prune_callbacks.remove(&info.url).unwrap_or_default() {
                callback(&event);
            }
        }
        for listener in &self.pruned_listeners {
            listener(&event);
        }
    }

    /// References reachable from `ids` through supersede chains.
    fn chained(&self, ids: &[ReferenceId]) -> FxHashSet<ReferenceId> {
        let mut kept: FxHashSet<ReferenceId> = ids.iter().copied().collect();
        let mut stack: Vec<ReferenceId> = ids.to_vec();
        while let Some(id) = stack.pop() {
            let Some(reference) = self.references.get(id) else {
                continue;
            };
            for linked in [reference.prev, reference.original].into_iter().flatten() {
                if kept.insert(linked) {
                    stack.push(linked);
                }
            }
        }
        kept
    }
}

fn sorted(urls: &FxHashSet<Url>) -> Vec<&Url> {
    let mut list: Vec<&Url> = urls.iter().collect();
    list.sort();
    list
}
