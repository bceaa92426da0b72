//! Shape: bundler plugins replace reachable resources with bundles.

use rustc_hash::{FxHashMap, FxHashSet};
use url::Url;

use crate::content::Content;
use crate::error::BuildError;
use crate::graph::{UrlGraph, UrlInfo, UrlType};
use crate::kitchen::Kitchen;
use crate::plugin::KitchenContext;
use crate::utils::plural::plural_count;
use crate::{debug, log};

/// What a bundle hook receives for one resource type.
pub struct BundleRequest<'a> {
    pub context: &'a KitchenContext,
    /// The whole crafted graph, for walking references
    pub graph: &'a UrlGraph,
    pub url_type: UrlType,
    /// Reachable, handled, non-inline nodes of `url_type` in traversal order
    pub url_infos: Vec<&'a UrlInfo>,
}

/// One file produced by a bundler.
#[derive(Debug, Clone)]
pub struct BundledFile {
    pub url: Url,
    pub url_type: UrlType,
    pub content: Content,
    pub content_type: Option<String>,
    pub sourcemap: Option<String>,
    /// Raw URLs whose content this file carries
    pub sources: Vec<Url>,
    pub is_entry_point: bool,
}

impl BundledFile {
    pub fn new(url: Url, url_type: UrlType, content: impl Into<Content>) -> Self {
        Self {
            url,
            url_type,
            content: content.into(),
            content_type: None,
            sourcemap: None,
            sources: Vec::new(),
            is_entry_point: false,
        }
    }

    pub fn with_sources(mut self, sources: Vec<Url>) -> Self {
        self.sources = sources;
        self
    }

    pub fn entry_point(mut self) -> Self {
        self.is_entry_point = true;
        self
    }
}

/// What a bundle hook returns.
#[derive(Debug, Clone, Default)]
pub struct BundleOutput {
    pub bundles: Vec<BundledFile>,
    /// Raw URL to the bundle URL that now stands for it
    pub redirections: Vec<(Url, Url)>,
}

/// Bundles and redirections gathered over every resource type.
#[derive(Debug, Default)]
pub(super) struct Shaped {
    pub bundles: FxHashMap<Url, BundledFile>,
    pub redirections: FxHashMap<Url, Url>,
    /// Raw URLs folded into a bundle that lives under another URL
    pub consumed: FxHashSet<Url>,
}

impl Shaped {
    /// The URL that represents `raw` after bundling.
    pub fn target_of<'a>(&'a self, raw: &'a Url) -> &'a Url {
        self.redirections.get(raw).unwrap_or(raw)
    }

    fn absorb(&mut self, output: BundleOutput) {
        for (raw, bundle) in output.redirections {
            if raw != bundle {
                self.consumed.insert(raw.clone());
            }
            self.redirections.insert(raw, bundle);
        }
        for bundle in output.bundles {
            self.bundles.insert(bundle.url.clone(), bundle);
        }
    }
}

/// Offer every bundled type to the first bundler that takes it.
///
/// A bundler that answers `Ok(None)` passes the type on to the next one;
/// an `Err` aborts the build.
pub(super) fn run(kitchen: &Kitchen) -> Result<Shaped, BuildError> {
    let bundlers = &kitchen.plugins().bundle;
    let mut shaped = Shaped::default();
    if bundlers.is_empty() {
        return Ok(shaped);
    }

    let graph = kitchen.graph();
    let reachable = graph.reachable_from_entries();
    let mut types: Vec<UrlType> = bundlers
        .iter()
        .flat_map(|(_, table)| table.keys().copied())
        .collect();
    types.sort();
    types.dedup();

    for url_type in types {
        let url_infos: Vec<&UrlInfo> = reachable
            .iter()
            .filter_map(|url| graph.get(url))
            .filter(|info| info.url_type == Some(url_type) && info.should_handle && !info.is_inline)
            .collect();
        if url_infos.is_empty() {
            continue;
        }
        let count = url_infos.len();
        let request = BundleRequest {
            context: kitchen.context(),
            graph: &graph,
            url_type,
            url_infos,
        };
        let Some((plugin, result)) = bundlers.until(|table| {
            let hook = table.get(&url_type)?;
            hook(&request).transpose()
        }) else {
            debug!("shape"; "no bundler took {url_type}");
            continue;
        };
        let output = result.map_err(|message| BuildError::Bundle {
            plugin: plugin.to_string(),
            url_type: url_type.to_string(),
            message,
        })?;
        log!(
            "shape";
            "{plugin}: {} into {}",
            plural_count(count, url_type.as_str()),
            plural_count(output.bundles.len(), "bundle")
        );
        shaped.absorb(output);
    }
    Ok(shaped)
}
