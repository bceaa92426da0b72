//! Hot reload propagation.
//!
//! A change to one node walks up through its dependents until every path
//! reaches a node that can absorb the update (a boundary). If any path
//! reaches a node with no dependents, meets a node that declined, or runs
//! into a cycle, the client needs a full reload instead.
//!
//! ```text
//! index.html ──► app.js ──► view.js ──► style.css      style.css accepts itself
//!                  │
//!                  └─ accept("./view.js")               app.js is the boundary for view.js
//! ```

mod message;
mod meta;

pub use message::{HotInstruction, HotReloadMessage};
pub use meta::{HotMeta, PruneSummary};

use rustc_hash::FxHashSet;
use url::Url;

use crate::graph::UrlGraph;

/// One place where an update is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub boundary: Url,
    /// Dependency whose update the boundary absorbs; `None` when the
    /// boundary is the changed node itself
    pub accepted_from: Option<Url>,
    /// Nodes that left the graph and should be disposed by the client
    pub pruned: Vec<Url>,
}

/// Outcome of propagating one change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotUpdate {
    Hot(Vec<Instruction>),
    Full {
        reason: String,
        declined_by: Option<Url>,
    },
}

impl HotUpdate {
    fn full(reason: &str) -> Self {
        Self::Full {
            reason: reason.to_string(),
            declined_by: None,
        }
    }

    fn declined(by: &Url) -> Self {
        Self::Full {
            reason: "declined".to_string(),
            declined_by: Some(by.clone()),
        }
    }

    pub fn is_hot(&self) -> bool {
        matches!(self, Self::Hot(_))
    }
}

/// Find the boundaries that absorb a change to `url`.
pub fn propagate_update(graph: &UrlGraph, url: &Url) -> HotUpdate {
    let Some(node) = graph.get(url) else {
        return HotUpdate::full("not in graph");
    };
    let meta = HotMeta::of(node);
    if meta.decline {
        return HotUpdate::declined(url);
    }
    if meta.accept_self {
        return HotUpdate::Hot(vec![Instruction {
            boundary: url.clone(),
            accepted_from: None,
            pruned: Vec::new(),
        }]);
    }

    let mut walk = Walk {
        graph,
        chain: Vec::new(),
        done: FxHashSet::default(),
        instructions: Vec::new(),
    };
    match walk.up_from(url) {
        Ok(()) => HotUpdate::Hot(walk.instructions),
        Err(full) => full,
    }
}

/// Propagate the removal of pruned nodes from the node that dropped them.
pub fn propagate_prune(graph: &UrlGraph, summary: &PruneSummary) -> HotUpdate {
    if let Some((url, _)) = summary.pruned.iter().find(|(_, meta)| meta.decline) {
        return HotUpdate::declined(url);
    }
    match propagate_update(graph, &summary.trigger) {
        HotUpdate::Hot(mut instructions) => {
            let pruned = summary.urls();
            for instruction in &mut instructions {
                instruction.pruned.clone_from(&pruned);
            }
            HotUpdate::Hot(instructions)
        }
        full => full,
    }
}

struct Walk<'g> {
    graph: &'g UrlGraph,
    /// Nodes on the current path, for cycle detection
    chain: Vec<Url>,
    /// Nodes whose dependents were fully explored
    done: FxHashSet<Url>,
    instructions: Vec<Instruction>,
}

impl Walk<'_> {
    fn up_from(&mut self, url: &Url) -> Result<(), HotUpdate> {
        let Some(node) = self.graph.get(url) else {
            return Ok(());
        };
        if node.dependents.is_empty() {
            return Err(HotUpdate::full("no hot boundary"));
        }
        let mut dependents: Vec<&Url> = node.dependents.iter().collect();
        dependents.sort();

        self.chain.push(url.clone());
        for dependent in dependents {
            let Some(info) = self.graph.get(dependent) else {
                continue;
            };
            let meta = HotMeta::of(info);
            if meta.decline {
                return Err(HotUpdate::declined(dependent));
            }
            if meta.accepts(url) {
                self.push(dependent, Some(url));
                continue;
            }
            if meta.accept_self {
                self.push(dependent, None);
                continue;
            }
            if self.chain.contains(dependent) {
                return Err(HotUpdate::full("cycle"));
            }
            if self.done.contains(dependent) {
                continue;
            }
            self.up_from(dependent)?;
        }
        self.chain.pop();
        self.done.insert(url.clone());
        Ok(())
    }

    fn push(&mut self, boundary: &Url, accepted_from: Option<&Url>) {
        let instruction = Instruction {
            boundary: boundary.clone(),
            accepted_from: accepted_from.cloned(),
            pruned: Vec::new(),
        };
        if !self.instructions.contains(&instruction) {
            self.instructions.push(instruction);
        }
    }
}
