//! Plugins and their hooks.
//!
//! A plugin is a named bundle of optional hooks. The kitchen never calls
//! hooks directly: it asks the [`PluginController`] for the hooks of one
//! kind, already filtered by the resource type when the hook is keyed by
//! type, and applies one of three semantics:
//!
//! | Semantics  | Hooks                                              |
//! |------------|----------------------------------------------------|
//! | until      | resolve, format, fetch, finalize, bundle           |
//! | fold       | redirect, search params                            |
//! | notify-all | transform, cooked, response headers                |
//!
//! Order is normal plugins in registration order, then low-priority
//! plugins in reverse registration order.

mod context;
mod controller;
mod hooks;

pub use context::{CancelSignal, KitchenContext, Phase};
pub use controller::{HookGroup, PluginController};
pub use hooks::{FetchRequest, Fetched, FinalizeRequest, TransformOutput};

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use url::Url;

use crate::build::{BundleOutput, BundleRequest};
use crate::error::{FetchError, TransformError};
use crate::graph::{Reference, UrlInfo, UrlType};
use crate::kitchen::{CookedScope, TransformScope};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
pub type FetchResult = Result<Option<Fetched>, FetchError>;
pub type ContentResult = Result<Option<TransformOutput>, TransformError>;

// ============================================================================
// Hook signatures
// ============================================================================

pub type ResolveHook = Arc<dyn Fn(&KitchenContext, &Reference) -> Option<Url> + Send + Sync>;
pub type RedirectHook = Arc<dyn Fn(&KitchenContext, &Reference, &Url) -> Option<Url> + Send + Sync>;
pub type SearchParamsHook =
    Arc<dyn Fn(&KitchenContext, &Reference, &UrlInfo) -> Option<Vec<(String, String)>> + Send + Sync>;
pub type FormatHook = Arc<dyn Fn(&KitchenContext, &Reference) -> Option<String> + Send + Sync>;
pub type FetchHook = Arc<dyn Fn(FetchRequest) -> BoxFuture<FetchResult> + Send + Sync>;
pub type TransformHook = Arc<dyn Fn(&mut TransformScope<'_>) -> ContentResult + Send + Sync>;
pub type FinalizeHook = Arc<dyn Fn(FinalizeRequest) -> BoxFuture<ContentResult> + Send + Sync>;
pub type CookedHook = Arc<dyn Fn(&mut CookedScope<'_>) + Send + Sync>;
pub type HeadersHook =
    Arc<dyn Fn(&KitchenContext, &UrlInfo) -> Option<Vec<(String, String)>> + Send + Sync>;
pub type BundleHook = Arc<dyn Fn(&BundleRequest<'_>) -> Result<Option<BundleOutput>, String> + Send + Sync>;

/// A hook for every resource, or one per resource type.
pub enum Hook<F> {
    Uniform(F),
    ByType(FxHashMap<UrlType, F>),
}

impl<F> Hook<F> {
    /// The function that applies to `url_type`, if any.
    pub fn select(&self, url_type: Option<UrlType>) -> Option<&F> {
        match self {
            Self::Uniform(hook) => Some(hook),
            Self::ByType(map) => map.get(&url_type?),
        }
    }

    fn insert(slot: &mut Option<Self>, url_type: UrlType, hook: F) {
        match slot {
            Some(Self::ByType(map)) => {
                map.insert(url_type, hook);
            }
            _ => {
                let mut map = FxHashMap::default();
                map.insert(url_type, hook);
                *slot = Some(Self::ByType(map));
            }
        }
    }
}

impl<F: Clone> Clone for Hook<F> {
    fn clone(&self) -> Self {
        match self {
            Self::Uniform(hook) => Self::Uniform(hook.clone()),
            Self::ByType(map) => Self::ByType(map.clone()),
        }
    }
}

/// Every hook a plugin may provide.
#[derive(Default, Clone)]
pub struct PluginHooks {
    pub resolve_reference: Option<ResolveHook>,
    pub redirect_reference: Option<RedirectHook>,
    pub transform_search_params: Option<SearchParamsHook>,
    pub format_reference: Option<FormatHook>,
    pub fetch_url_content: Option<FetchHook>,
    pub transform_url_content: Option<Hook<TransformHook>>,
    pub finalize_url_content: Option<Hook<FinalizeHook>>,
    pub cooked: Option<CookedHook>,
    pub inject_response_headers: Option<HeadersHook>,
    pub bundle: FxHashMap<UrlType, BundleHook>,
}

// ============================================================================
// Plugin
// ============================================================================

/// When a plugin takes part in a kitchen.
pub enum AppliesDuring {
    Always,
    Dev,
    Build,
    Phase(Phase),
    When(Box<dyn Fn(&KitchenContext) -> bool + Send + Sync>),
}

impl AppliesDuring {
    pub fn matches(&self, context: &KitchenContext) -> bool {
        match self {
            Self::Always => true,
            Self::Dev => context.phase == Phase::Dev,
            Self::Build => context.phase.is_build(),
            Self::Phase(phase) => context.phase == *phase,
            Self::When(predicate) => predicate(context),
        }
    }
}

pub struct Plugin {
    pub(crate) name: Cow<'static, str>,
    pub(crate) low_priority: bool,
    pub(crate) applies_during: AppliesDuring,
    pub(crate) hooks: PluginHooks,
    pub(crate) teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("low_priority", &self.low_priority)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            low_priority: false,
            applies_during: AppliesDuring::Always,
            hooks: PluginHooks::default(),
            teardown: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run after every normal plugin.
    pub fn low_priority(mut self) -> Self {
        self.low_priority = true;
        self
    }

    pub fn applies_during(mut self, applies: AppliesDuring) -> Self {
        self.applies_during = applies;
        self
    }

    pub fn on_teardown(mut self, teardown: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.teardown = Some(Box::new(teardown));
        self
    }

    pub fn resolve_reference(
        mut self,
        hook: impl Fn(&KitchenContext, &Reference) -> Option<Url> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.resolve_reference = Some(Arc::new(hook));
        self
    }

    pub fn redirect_reference(
        mut self,
        hook: impl Fn(&KitchenContext, &Reference, &Url) -> Option<Url> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.redirect_reference = Some(Arc::new(hook));
        self
    }

    pub fn transform_search_params(
        mut self,
        hook: impl Fn(&KitchenContext, &Reference, &UrlInfo) -> Option<Vec<(String, String)>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.hooks.transform_search_params = Some(Arc::new(hook));
        self
    }

    pub fn format_reference(
        mut self,
        hook: impl Fn(&KitchenContext, &Reference) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.format_reference = Some(Arc::new(hook));
        self
    }

    pub fn fetch_url_content<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(FetchRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        let hook: FetchHook =
            Arc::new(move |request: FetchRequest| -> BoxFuture<FetchResult> { Box::pin(hook(request)) });
        self.hooks.fetch_url_content = Some(hook);
        self
    }

    pub fn transform_url_content(
        mut self,
        hook: impl Fn(&mut TransformScope<'_>) -> ContentResult + Send + Sync + 'static,
    ) -> Self {
        let hook: TransformHook = Arc::new(hook);
        self.hooks.transform_url_content = Some(Hook::Uniform(hook));
        self
    }

    /// Transform only resources of `url_type`; may be called once per type.
    pub fn transform_url_content_for(
        mut self,
        url_type: UrlType,
        hook: impl Fn(&mut TransformScope<'_>) -> ContentResult + Send + Sync + 'static,
    ) -> Self {
        let hook: TransformHook = Arc::new(hook);
        Hook::insert(&mut self.hooks.transform_url_content, url_type, hook);
        self
    }

    pub fn finalize_url_content<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(FinalizeRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ContentResult> + Send + 'static,
    {
        let hook: FinalizeHook =
            Arc::new(move |request: FinalizeRequest| -> BoxFuture<ContentResult> { Box::pin(hook(request)) });
        self.hooks.finalize_url_content = Some(Hook::Uniform(hook));
        self
    }

    pub fn finalize_url_content_for<F, Fut>(mut self, url_type: UrlType, hook: F) -> Self
    where
        F: Fn(FinalizeRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ContentResult> + Send + 'static,
    {
        let hook: FinalizeHook =
            Arc::new(move |request: FinalizeRequest| -> BoxFuture<ContentResult> { Box::pin(hook(request)) });
        Hook::insert(&mut self.hooks.finalize_url_content, url_type, hook);
        self
    }

    pub fn cooked(mut self, hook: impl Fn(&mut CookedScope<'_>) + Send + Sync + 'static) -> Self {
        self.hooks.cooked = Some(Arc::new(hook));
        self
    }

    pub fn inject_response_headers(
        mut self,
        hook: impl Fn(&KitchenContext, &UrlInfo) -> Option<Vec<(String, String)>> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.inject_response_headers = Some(Arc::new(hook));
        self
    }

    /// Bundle every reachable resource of `url_type` during the shape phase.
    pub fn bundle(
        mut self,
        url_type: UrlType,
        hook: impl Fn(&BundleRequest<'_>) -> Result<Option<BundleOutput>, String> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.bundle.insert(url_type, Arc::new(hook));
        self
    }
}
