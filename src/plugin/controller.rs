//! Plugin ordering and hook dispatch.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{
    BundleHook, CookedHook, FetchHook, FinalizeHook, FormatHook, HeadersHook, Hook, KitchenContext,
    Plugin, PluginHooks, RedirectHook, ResolveHook, SearchParamsHook, TransformHook,
};
use crate::debug;
use crate::graph::UrlType;

// ============================================================================
// HookGroup
// ============================================================================

/// Hooks of one kind, in call order, tagged with their plugin's name.
pub struct HookGroup<H> {
    entries: Vec<(Arc<str>, H)>,
}

impl<H: Clone> Clone for HookGroup<H> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<H> HookGroup<H> {
    fn collect(plugins: &[(Arc<str>, PluginHooks)], select: impl Fn(&PluginHooks) -> Option<&H>) -> Self
    where
        H: Clone,
    {
        let entries = plugins
            .iter()
            .filter_map(|(name, hooks)| select(hooks).map(|hook| (Arc::clone(name), hook.clone())))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &H)> {
        self.entries.iter().map(|(name, hook)| (&**name, hook))
    }

    /// First hook returning `Some` wins.
    pub fn until<R>(&self, mut call: impl FnMut(&H) -> Option<R>) -> Option<(Arc<str>, R)> {
        self.entries
            .iter()
            .find_map(|(name, hook)| call(hook).map(|result| (Arc::clone(name), result)))
    }

    /// Thread a value through every hook; `None` keeps it unchanged.
    pub fn fold<T>(&self, init: T, mut call: impl FnMut(&H, &T) -> Option<T>) -> T {
        self.entries
            .iter()
            .fold(init, |value, (_, hook)| call(hook, &value).unwrap_or(value))
    }

    /// Call every hook in order.
    pub fn notify_all(&self, mut call: impl FnMut(&str, &H)) {
        for (name, hook) in &self.entries {
            call(name, hook);
        }
    }

    /// Await hooks one after another until one yields `Some` or fails.
    pub async fn until_async<R, E, Fut>(
        &self,
        mut call: impl FnMut(&H) -> Fut,
    ) -> Result<Option<(Arc<str>, R)>, (Arc<str>, E)>
    where
        Fut: Future<Output = Result<Option<R>, E>>,
    {
        for (name, hook) in &self.entries {
            match call(hook).await {
                Ok(Some(result)) => return Ok(Some((Arc::clone(name), result))),
                Ok(None) => continue,
                Err(err) => return Err((Arc::clone(name), err)),
            }
        }
        Ok(None)
    }
}

impl<F: Clone> HookGroup<Hook<F>> {
    /// Hooks applying to `url_type`, keeping plugin order.
    pub fn for_type(&self, url_type: Option<UrlType>) -> HookGroup<F> {
        let entries = self
            .entries
            .iter()
            .filter_map(|(name, hook)| hook.select(url_type).map(|f| (Arc::clone(name), f.clone())))
            .collect();
        HookGroup { entries }
    }
}

// ============================================================================
// PluginController
// ============================================================================

type Teardown = Box<dyn FnOnce() + Send + Sync>;

/// The applying plugins of one kitchen, resolved into per-kind hook groups.
///
/// Groups are built once at construction, so dispatch never looks at
/// plugins that lack a hook.
pub struct PluginController {
    names: Vec<Arc<str>>,
    pub resolve: HookGroup<ResolveHook>,
    pub redirect: HookGroup<RedirectHook>,
    pub search_params: HookGroup<SearchParamsHook>,
    pub format: HookGroup<FormatHook>,
    pub fetch: HookGroup<FetchHook>,
    pub transform: HookGroup<Hook<TransformHook>>,
    pub finalize: HookGroup<Hook<FinalizeHook>>,
    pub cooked: HookGroup<CookedHook>,
    pub headers: HookGroup<HeadersHook>,
    pub bundle: HookGroup<FxHashMap<UrlType, BundleHook>>,
    teardowns: Mutex<Vec<Teardown>>,
}

impl PluginController {
    /// Keep the plugins that apply to `context` and order them.
    ///
    /// Plugins that do not apply have their teardown run immediately.
    pub fn new(plugins: Vec<Plugin>, context: &KitchenContext) -> Self {
        let mut normal = Vec::new();
        let mut low = Vec::new();
        let mut teardowns = Vec::new();

        for plugin in plugins {
            if !plugin.applies_during.matches(context) {
                debug!("plugin"; "`{}` skipped during {}", plugin.name, context.phase.as_str());
                if let Some(teardown) = plugin.teardown {
                    teardown();
                }
                continue;
            }
            if let Some(teardown) = plugin.teardown {
                teardowns.push(teardown);
            }
            let entry = (Arc::<str>::from(plugin.name.as_ref()), plugin.hooks);
            if plugin.low_priority {
                low.push(entry);
            } else {
                normal.push(entry);
            }
        }
        low.reverse();
        normal.extend(low);
        let ordered = normal;

        Self {
            names: ordered.iter().map(|(name, _)| Arc::clone(name)).collect(),
            resolve: HookGroup::collect(&ordered, |h| h.resolve_reference.as_ref()),
            redirect: HookGroup::collect(&ordered, |h| h.redirect_reference.as_ref()),
            search_params: HookGroup::collect(&ordered, |h| h.transform_search_params.as_ref()),
            format: HookGroup::collect(&ordered, |h| h.format_reference.as_ref()),
            fetch: HookGroup::collect(&ordered, |h| h.fetch_url_content.as_ref()),
            transform: HookGroup::collect(&ordered, |h| h.transform_url_content.as_ref()),
            finalize: HookGroup::collect(&ordered, |h| h.finalize_url_content.as_ref()),
            cooked: HookGroup::collect(&ordered, |h| h.cooked.as_ref()),
            headers: HookGroup::collect(&ordered, |h| h.inject_response_headers.as_ref()),
            bundle: HookGroup::collect(&ordered, |h| (!h.bundle.is_empty()).then_some(&h.bundle)),
            teardowns: Mutex::new(teardowns),
        }
    }

    /// Names of applying plugins, in call order.
    pub fn plugin_names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|name| &**name)
    }

    /// Run every pending teardown once.
    pub fn teardown(&self) {
        let teardowns = std::mem::take(&mut *self.teardowns.lock());
        for teardown in teardowns {
            teardown();
        }
    }
}

impl Drop for PluginController {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use url::Url;

    use super::*;
    use crate::graph::{Reference, ReferenceKind};
    use crate::plugin::{AppliesDuring, Phase};

    fn context(phase: Phase) -> KitchenContext {
        KitchenContext::new(phase, Url::parse("file:///app/").unwrap())
    }

    fn resolver(name: &'static str) -> Plugin {
        Plugin::new(name).resolve_reference(move |_, _| Url::parse(&format!("file:///{name}")).ok())
    }

    #[test]
    fn test_order_normal_then_low_reversed() {
        let plugins = vec![
            Plugin::new("low-a").low_priority(),
            Plugin::new("a"),
            Plugin::new("low-b").low_priority(),
            Plugin::new("b"),
        ];
        let controller = PluginController::new(plugins, &context(Phase::Dev));
        let names: Vec<&str> = controller.plugin_names().collect();
        assert_eq!(names, ["a", "b", "low-b", "low-a"]);
    }

    #[test]
    fn test_until_first_some_wins() {
        let plugins = vec![
            Plugin::new("silent").resolve_reference(|_, _| None),
            resolver("first"),
            resolver("second"),
        ];
        let controller = PluginController::new(plugins, &context(Phase::Dev));
        let reference = Reference::new(ReferenceKind::ScriptImport, "./x.js");
        let ctx = context(Phase::Dev);

        let (name, url) = controller.resolve.until(|hook| hook(&ctx, &reference)).unwrap();
        assert_eq!(&*name, "first");
        assert_eq!(url.as_str(), "file:///first");
        assert_eq!(controller.resolve.len(), 3);
    }

    #[test]
    fn test_fold_threads_value() {
        let plugins = vec![
            Plugin::new("add-a").redirect_reference(|_, _, url| Url::parse(&format!("{url}a")).ok()),
            Plugin::new("keep").redirect_reference(|_, _, _| None),
            Plugin::new("add-b").redirect_reference(|_, _, url| Url::parse(&format!("{url}b")).ok()),
        ];
        let ctx = context(Phase::Dev);
        let controller = PluginController::new(plugins, &ctx);
        let reference = Reference::new(ReferenceKind::ScriptImport, "./x");
        let start = Url::parse("file:///x").unwrap();

        let out = controller
            .redirect
            .fold(start, |hook, url| hook(&ctx, &reference, url));
        assert_eq!(out.as_str(), "file:///xab");
    }

    #[test]
    fn test_non_applying_plugin_is_torn_down_at_registration() {
        let torn = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&torn);
        let plugins = vec![
            Plugin::new("build-only")
                .applies_during(AppliesDuring::Build)
                .on_teardown(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        ];

        let controller = PluginController::new(plugins, &context(Phase::Dev));
        assert_eq!(torn.load(Ordering::SeqCst), 1);
        assert_eq!(controller.plugin_names().count(), 0);
    }

    #[test]
    fn test_teardown_runs_once_on_drop() {
        let torn = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&torn);
        let plugins = vec![Plugin::new("p").on_teardown(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })];

        let controller = PluginController::new(plugins, &context(Phase::Craft));
        controller.teardown();
        drop(controller);
        assert_eq!(torn.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_for_type_filters_keyed_hooks() {
        let plugins = vec![
            Plugin::new("css-only").transform_url_content_for(UrlType::Css, |_| Ok(None)),
            Plugin::new("all").transform_url_content(|_| Ok(None)),
        ];
        let controller = PluginController::new(plugins, &context(Phase::Dev));

        let css_group = controller.transform.for_type(Some(UrlType::Css));
        let js_group = controller.transform.for_type(Some(UrlType::JsModule));
        let unknown = controller.transform.for_type(None);
        let css: Vec<&str> = css_group.iter().map(|(n, _)| n).collect();
        let js: Vec<&str> = js_group.iter().map(|(n, _)| n).collect();
        assert_eq!(css, ["css-only", "all"]);
        assert_eq!(js, ["all"]);
        assert_eq!(unknown.len(), 1);
    }

    #[tokio::test]
    async fn test_until_async_stops_at_error() {
        let group: HookGroup<u8> = HookGroup {
            entries: vec![("a".into(), 0), ("b".into(), 1), ("c".into(), 2)],
        };
        let result: Result<Option<(Arc<str>, u8)>, (Arc<str>, String)> = group
            .until_async(|n| {
                let n = *n;
                async move {
                    match n {
                        0 => Ok(None),
                        1 => Err("boom".to_string()),
                        _ => Ok(Some(n)),
                    }
                }
            })
            .await;
        let (name, err) = result.unwrap_err();
        assert_eq!((&*name, err.as_str()), ("b", "boom"));
    }
}
