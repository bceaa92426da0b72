//! Refine: re-root crafted and bundled resources into the build directory.
//!
//! The refine kitchen never reads the source tree. Its resolver accepts
//! the absolute raw URLs recovered from crafted reference tokens, its
//! redirector maps them to allocated build URLs, and its fetcher serves
//! crafted or bundled content for those build URLs. Generated specifiers
//! are version placeholders filled in by the versioning pass.

use std::future;
use std::ops::Range;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use rustc_hash::FxHashMap;
use url::Url;

use super::allocator::{Allocation, BuildUrls};
use super::craft::Crafted;
use super::shape::Shaped;
use super::{BuildOptions, REFERENCE_TOKEN};
use crate::error::{BuildError, FetchError};
use crate::graph::{Reference, ReferenceId, UrlType};
use crate::kitchen::{GraphLoader, Kitchen, TransformScope};
use crate::plugin::{ContentResult, FetchResult, Fetched, KitchenContext, Phase, Plugin};
use crate::utils::plural::plural_count;
use crate::utils::{mime, urls};
use crate::{debug, log};

/// Refine content names the target of each handled reference with these.
pub(super) static VERSION_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(["']?)__SIMMER_V_(\d+)__(["']?)"#).unwrap());

pub(super) fn version_placeholder(id: ReferenceId) -> String {
    format!("__SIMMER_V_{}__", id.index())
}

pub(super) struct Refined {
    pub kitchen: Arc<Kitchen>,
    pub plan: Arc<BuildPlan>,
}

// ============================================================================
// BuildPlan
// ============================================================================

/// Where every refined resource comes from.
#[derive(Debug)]
pub(super) struct BuildPlan {
    craft: Arc<Kitchen>,
    shaped: Shaped,
    urls: BuildUrls,
    /// Build URL to the raw or bundle URL it is made from
    sources: FxHashMap<Url, Url>,
}

impl BuildPlan {
    /// Allocate build URLs in traversal order, so names only depend on
    /// graph content.
    fn new(crafted: &Crafted, shaped: Shaped, options: &BuildOptions) -> Self {
        let mut allocated = BuildUrls::new(&options.build_directory_url, &options.assets_dir);
        let root = &crafted.kitchen.context().root_directory_url;
        {
            let graph = crafted.kitchen.graph();
            for raw in graph.reachable_from_entries() {
                let Some(info) = graph.get(&raw) else { continue };
                if info.is_inline || !info.should_handle {
                    continue;
                }
                let source = shaped.target_of(&raw);
                if allocated.get(source).is_some() {
                    continue;
                }
                let root_relative = urls::relative_to(&urls::without_query(source), root);
                let allocation = match shaped.bundles.get(source) {
                    Some(bundle) => Allocation {
                        url_type: Some(bundle.url_type),
                        is_entry_point: bundle.is_entry_point || info.is_entry_point,
                        root_relative: root_relative.as_deref(),
                        filename_hint: None,
                    },
                    None => Allocation {
                        url_type: info.url_type,
                        is_entry_point: info.is_entry_point,
                        root_relative: root_relative.as_deref(),
                        filename_hint: info.filename_hint.as_deref(),
                    },
                };
                allocated.allocate(source, allocation);
            }
        }

        let mut orphans: Vec<_> = shaped
            .bundles
            .values()
            .filter(|bundle| allocated.get(&bundle.url).is_none())
            .collect();
        orphans.sort_by(|a, b| a.url.cmp(&b.url));
        for bundle in orphans {
            let root_relative = urls::relative_to(&bundle.url, root);
            allocated.allocate(
                &bundle.url,
                Allocation {
                    url_type: Some(bundle.url_type),
                    is_entry_point: bundle.is_entry_point,
                    root_relative: root_relative.as_deref(),
                    filename_hint: None,
                },
            );
        }

        let sources = allocated.iter().map(|(source, build)| (build.clone(), source.clone())).collect();
        Self {
            craft: Arc::clone(&crafted.kitchen),
            shaped,
            urls: allocated,
            sources,
        }
    }

    pub fn craft(&self) -> &Arc<Kitchen> {
        &self.craft
    }

    /// Build URL now standing for raw URL `raw`.
    pub fn build_url_of(&self, raw: &Url) -> Option<&Url> {
        self.urls.get(self.shaped.target_of(raw))
    }

    /// Whether a resource hint at `raw` points at nothing left to load.
    fn hint_is_dangling(&self, raw: &Url) -> bool {
        self.shaped.consumed.contains(raw) || self.build_url_of(raw).is_none()
    }

    fn fetch(&self, url: &Url) -> FetchResult {
        let Some(source) = self.sources.get(url) else {
            return Ok(None);
        };
        if let Some(bundle) = self.shaped.bundles.get(source) {
            let mut fetched = Fetched::new(bundle.content.clone()).with_type(bundle.url_type);
            fetched.content_type = Some(
                bundle
                    .content_type
                    .clone()
                    .unwrap_or_else(|| mime::for_type(bundle.url_type).to_string()),
            );
            fetched.sourcemap = bundle.sourcemap.clone();
            return Ok(Some(fetched));
        }

        let graph = self.craft.graph();
        let Some(info) = graph.get(source) else {
            return Err(FetchError::NotFound(url.clone()));
        };
        let Some(content) = info.content.clone() else {
            return Err(FetchError::NotFound(url.clone()));
        };
        let mut fetched = Fetched::new(content).with_sourcemap(info.sourcemap.clone());
        fetched.content_type = info.content_type.clone();
        fetched.url_type = info.url_type;
        fetched.subtype = info.subtype;
        Ok(Some(fetched))
    }

    fn raw_reference(&self, id: ReferenceId) -> Option<Reference> {
        self.craft.graph().reference(id).cloned()
    }
}

// ============================================================================
// Refine plugins
// ============================================================================

/// Refine specifiers are absolute raw URLs.
fn raw_url_resolution() -> Plugin {
    Plugin::new("build-resolve").resolve_reference(|_, reference| Url::parse(&reference.specifier).ok())
}

fn build_url_redirect(plan: &Arc<BuildPlan>) -> Plugin {
    let plan = Arc::clone(plan);
    Plugin::new("build-redirect").redirect_reference(move |_, _, url| plan.build_url_of(url).cloned())
}

fn build_fetch(plan: &Arc<BuildPlan>) -> Plugin {
    let plan = Arc::clone(plan);
    Plugin::new("build-fetch").fetch_url_content(move |request| future::ready(plan.fetch(&request.url)))
}

/// Turn crafted reference tokens back into references.
fn reference_tokens(plan: &Arc<BuildPlan>) -> Plugin {
    let plan = Arc::clone(plan);
    Plugin::new("build-reference-tokens").transform_url_content(move |scope| scan_tokens(&plan, scope))
}

fn scan_tokens(plan: &BuildPlan, scope: &mut TransformScope<'_>) -> ContentResult {
    let Some(text) = scope.text() else {
        return Ok(None);
    };
    let is_html = scope.url_type() == UrlType::Html;

    for caps in REFERENCE_TOKEN.captures_iter(text) {
        let (Some(token), Some(id)) = (caps.get(0), caps[1].parse().ok().and_then(ReferenceId::from_index)) else {
            continue;
        };
        let Some(raw) = plan.raw_reference(id) else {
            debug!("refine"; "unknown reference token {} in {}", token.as_str(), scope.url());
            continue;
        };
        let Some(target) = raw.url.as_ref() else { continue };

        if raw.is_resource_hint && plan.hint_is_dangling(target) {
            if is_html && let Some(tag) = enclosing_link(text, token.start()) {
                debug!("refine"; "dropping hint to {target}");
                scope.replace(tag, "");
            }
            continue;
        }

        let mut reference = Reference::new(raw.kind, target.as_str())
            .with_span(token.range())
            .with_escape(raw.escape)
            .with_trace(scope.trace_at(token.start()));
        reference.subkind = raw.subkind;
        reference.expected_type = raw.expected_type;
        reference.expected_subtype = raw.expected_subtype;
        reference.is_resource_hint = raw.is_resource_hint;
        reference.has_versioning_effect = raw.has_versioning_effect;
        scope.found(reference);
    }
    Ok(None)
}

/// The `<link ...>` tag around `offset`, if that is where it sits.
fn enclosing_link(text: &str, offset: usize) -> Option<Range<usize>> {
    let start = text[..offset].rfind('<')?;
    let end = offset + text[offset..].find('>')? + 1;
    text[start..].starts_with("<link").then_some(start..end)
}

/// Handled references become version placeholders.
fn version_placeholders() -> Plugin {
    Plugin::new("build-version-placeholders").format_reference(|context, reference| {
        let url = reference.url.as_ref()?;
        context.should_handle(url).then(|| version_placeholder(reference.id))
    })
}

// ============================================================================
// Run
// ============================================================================

pub(super) async fn run(
    options: &BuildOptions,
    crafted: Crafted,
    shaped: Shaped,
    extra: Vec<Plugin>,
) -> Result<Refined, BuildError> {
    let plan = Arc::new(BuildPlan::new(&crafted, shaped, options));
    let context = KitchenContext::new(Phase::Refine, options.build_directory_url.clone())
        .with_build_directory(options.build_directory_url.clone())
        .with_signal(options.signal.clone());

    let mut plugins = vec![
        version_placeholders(),
        raw_url_resolution(),
        build_url_redirect(&plan),
        build_fetch(&plan),
        reference_tokens(&plan),
    ];
    plugins.extend(extra);
    let kitchen = Kitchen::new(context, plugins);

    let mut loader = GraphLoader::new(&kitchen);
    for raw in &crafted.entries {
        let url = kitchen
            .prepare_entry_point(raw.as_str())
            .map_err(|_| BuildError::EntryPoint(raw.to_string()))?;
        loader.load(url);
    }
    let loaded = loader.drain().await?;
    let pruned = kitchen.graph().prune_unused();
    log!(
        "refine";
        "{} re-rooted, {} pruned",
        plural_count(loaded, "resource"),
        pruned
    );
    Ok(Refined { kitchen, plan })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosing_link() {
        let html = r#"<p>x</p><link rel="modulepreload" href="TOKEN"><script></script>"#;
        let offset = html.find("TOKEN").unwrap();
        let span = enclosing_link(html, offset).unwrap();
        assert_eq!(&html[span], r#"<link rel="modulepreload" href="TOKEN">"#);

        let script = r#"<script src="TOKEN"></script>"#;
        assert_eq!(enclosing_link(script, script.find("TOKEN").unwrap()), None);
    }

    #[test]
    fn test_placeholder_pattern() {
        let id = ReferenceId::from_index(12).unwrap();
        let text = format!("import '{}'", version_placeholder(id));
        let caps = VERSION_PLACEHOLDER.captures(&text).unwrap();
        assert_eq!(&caps[1], "'");
        assert_eq!(&caps[2], "12");
        assert_eq!(&caps[3], "'");
    }
}
