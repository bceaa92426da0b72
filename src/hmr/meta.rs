//! Per-node hot reload declarations.

use url::Url;

use crate::graph::{PruneEvent, UrlInfo, UrlType};

/// What a resource declared about receiving updates.
///
/// Scanners store it in the node's data bag while transforming; nodes
/// that never declared anything get the default (accepts nothing).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotMeta {
    /// Can re-run itself in place (`import.meta.hot.accept()`)
    pub accept_self: bool,
    /// Any update reaching it needs a full reload
    pub decline: bool,
    /// Dependencies whose updates it handles (`accept("./dep.js")`)
    pub accept_from: Vec<Url>,
}

impl HotMeta {
    /// Declarations of `info`. Stylesheets always accept themselves.
    pub fn of(info: &UrlInfo) -> Self {
        let mut meta = info.data.get::<Self>().cloned().unwrap_or_default();
        if info.url_type == Some(UrlType::Css) {
            meta.accept_self = true;
        }
        meta
    }

    pub fn accepts(&self, dependency: &Url) -> bool {
        self.accept_from.contains(dependency)
    }
}

/// A prune event reduced to what propagation needs.
///
/// Built inside the graph's prune listener, where the graph itself cannot
/// be read, and propagated once the mutation is over.
#[derive(Debug, Clone)]
pub struct PruneSummary {
    pub trigger: Url,
    pub pruned: Vec<(Url, HotMeta)>,
}

impl PruneSummary {
    pub fn from_event(event: &PruneEvent) -> Self {
        Self {
            trigger: event.trigger.clone(),
            pruned: event
                .pruned
                .iter()
                .map(|info| (info.url.clone(), HotMeta::of(info)))
                .collect(),
        }
    }

    pub fn urls(&self) -> Vec<Url> {
        self.pruned.iter().map(|(url, _)| url.clone()).collect()
    }
}
