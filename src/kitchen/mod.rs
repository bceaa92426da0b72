//! The kitchen: turns a URL into cooked content.
//!
//! Cooking one URL runs five stages, each a kind of plugin hook:
//!
//! ```text
//! fetch ──► transform ──► update references ──► finalize ──► cooked
//!   │           │                 │
//!   │           │                 └─ graph edges reconciled, orphans pruned
//!   │           └─ hooks report references; inline bodies cooked first
//!   └─ first fetch hook returning content wins
//! ```
//!
//! Concurrent requests for the same URL share one in-flight cook. A cook
//! that started before the node was last modified is abandoned and a
//! fresh one started; its callers end up with the fresh result.

mod loader;
mod scope;

#[cfg(test)]
mod tests;

pub use loader::GraphLoader;
pub use scope::{CookedScope, TransformScope};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use url::Url;

use self::scope::{Findings, Replacement, Rewrite};
use crate::content::Content;
use crate::debug;
use crate::error::{CookError, CookErrorKind, CookResult, FetchError};
use crate::graph::{CookState, DataBag, Reference, ReferenceId, ReferenceKind, UrlGraph, UrlInfo, UrlType};
use crate::plugin::{
    BoxFuture, FetchRequest, Fetched, FinalizeRequest, KitchenContext, Plugin, PluginController,
};
use crate::utils::mime;
use crate::utils::timestamp::{self, Timestamp};

/// Why a cook stopped before committing.
enum Interrupt {
    /// A newer cook of the same URL took over
    Superseded,
    /// The node left the graph mid-cook
    Gone,
    Failed(Arc<CookError>),
}

impl From<CookError> for Interrupt {
    fn from(err: CookError) -> Self {
        Self::Failed(Arc::new(err))
    }
}

struct PendingCook {
    generation: u64,
    started: Timestamp,
    done: watch::Receiver<Option<CookResult>>,
}

enum Claim {
    Wait(watch::Receiver<Option<CookResult>>),
    Own {
        generation: u64,
        started: Timestamp,
        done: watch::Sender<Option<CookResult>>,
    },
}

/// Removes the pending entry of an owned cook, even if its future is dropped.
struct PendingGuard<'a> {
    kitchen: &'a Kitchen,
    url: &'a Url,
    generation: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.kitchen
            .pending
            .remove_if(self.url, |_, pending| pending.generation == self.generation);
    }
}

/// Output of the transform stage.
struct Transformed {
    content: Content,
    sourcemap: Option<String>,
    references: Vec<ReferenceId>,
    data: DataBag,
}

// ============================================================================
// Kitchen
// ============================================================================

pub struct Kitchen {
    context: Arc<KitchenContext>,
    plugins: PluginController,
    graph: Mutex<UrlGraph>,
    pending: DashMap<Url, PendingCook>,
    generation: AtomicU64,
    cooks: AtomicUsize,
}

impl std::fmt::Debug for Kitchen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kitchen")
            .field("phase", &self.context.phase)
            .field("runtime", &self.context.runtime)
            .finish_non_exhaustive()
    }
}

impl Kitchen {
    pub fn new(context: KitchenContext, plugins: Vec<Plugin>) -> Arc<Self> {
        let plugins = PluginController::new(plugins, &context);
        debug!("kitchen"; "{} kitchen with plugins: {}",
            context.phase.as_str(),
            plugins.plugin_names().collect::<Vec<_>>().join(", "));
        Arc::new(Self {
            context: Arc::new(context),
            plugins,
            graph: Mutex::new(UrlGraph::new()),
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
            cooks: AtomicUsize::new(0),
        })
    }

    pub fn context(&self) -> &Arc<KitchenContext> {
        &self.context
    }

    pub fn plugins(&self) -> &PluginController {
        &self.plugins
    }

    /// Lock the graph. Never hold the guard across an await.
    pub fn graph(&self) -> MutexGuard<'_, UrlGraph> {
        self.graph.lock()
    }

    /// Number of cooks run so far (deduplicated waits not counted).
    pub fn cook_count(&self) -> usize {
        self.cooks.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------------

    /// Resolve and redirect a specifier without touching the graph.
    pub fn resolve_url(&self, reference: &Reference) -> Result<Url, CookError> {
        let context = &*self.context;
        let Some((_, url)) = self.plugins.resolve.until(|hook| hook(context, reference)) else {
            let mut err = CookError::new(CookErrorKind::Resolve(reference.specifier.clone()))
                .with_trace(reference.trace.clone());
            err.url = reference.parent_url.clone();
            return Err(err);
        };
        Ok(self
            .plugins
            .redirect
            .fold(url, |hook, current| hook(context, reference, current)))
    }

    /// Resolve a reference into the graph and store it.
    ///
    /// The target node is created if needed and learns what the reference
    /// knows about it. The stored reference carries its final URL, its
    /// generated URL (with search params) and its generated specifier.
    pub fn resolve_reference(&self, mut reference: Reference) -> Result<ReferenceId, CookError> {
        let context = &*self.context;
        let Some((_, resolved)) = self.plugins.resolve.until(|hook| hook(context, &reference)) else {
            let mut err = CookError::new(CookErrorKind::Resolve(reference.specifier.clone()))
                .with_trace(reference.trace.clone());
            err.url = reference.parent_url.clone();
            return Err(err);
        };
        let url = self
            .plugins
            .redirect
            .fold(resolved.clone(), |hook, current| hook(context, &reference, current));

        let mut graph = self.graph.lock();
        let redirected_from = (url != resolved).then(|| {
            let mut before = reference.clone();
            before.url = Some(resolved);
            graph.references_mut().alloc(before)
        });

        reference.url = Some(url.clone());
        let node = graph.reuse_or_create(&url);
        node.absorb(&reference);
        node.should_handle = context.should_handle(&url);
        if node.generated_url.is_none() {
            node.generated_url = Some(url.clone());
        }
        let node: &UrlInfo = node;
        let params = self.plugins.search_params.fold(Vec::new(), |hook, current: &Vec<(String, String)>| {
            hook(context, &reference, node).map(|extra| {
                let mut merged = current.clone();
                merged.extend(extra);
                merged
            })
        });
        reference.generated_url = Some(crate::utils::urls::with_search_params(&url, &params));
        reference.search_params = params;

        let id = graph.references_mut().alloc(reference);
        if let Some(before) = redirected_from {
            graph.references_mut().supersede(before, id);
        }
        let specifier = graph.reference(id).map(|stored| {
            let formatted = self
                .plugins
                .format
                .until(|hook| hook(context, stored))
                .map(|(_, specifier)| specifier)
                .unwrap_or_else(|| default_specifier(context, stored));
            stored.escape.apply(&formatted)
        });
        if let Some(stored) = graph.references_mut().get_mut(id) {
            stored.generated_specifier = specifier;
        }
        Ok(id)
    }

    /// Resolve a build entry point and mark its node.
    pub fn prepare_entry_point(&self, specifier: &str) -> Result<Url, CookError> {
        let reference = Reference::new(ReferenceKind::EntryPoint, specifier)
            .with_parent(&self.context.root_directory_url);
        self.adopt_root_reference(reference)
    }

    /// Resolve a client request path (`/dir/file.js?x`) to a node.
    ///
    /// Requested nodes that nothing depends on become entry points, so a
    /// page opened directly in the browser is never pruned under it. They
    /// stop being entry points once something imports them.
    pub fn resolve_request(&self, path: &str) -> Result<Url, CookError> {
        let reference =
            Reference::new(ReferenceKind::Request, path).with_parent(&self.context.root_directory_url);
        let url = self.adopt_root_reference(reference)?;
        let mut graph = self.graph.lock();
        if let Some(node) = graph.get_mut(&url)
            && node.dependents.is_empty()
            && !node.is_entry_point
        {
            node.is_entry_point = true;
            node.is_requested_entry = true;
        }
        Ok(url)
    }

    fn adopt_root_reference(&self, reference: Reference) -> Result<Url, CookError> {
        let url = self.resolve_url(&reference)?;
        let mut graph = self.graph.lock();
        let node = graph.reuse_or_create(&url);
        node.absorb(&reference);
        node.should_handle = self.context.should_handle(&url);
        if node.generated_url.is_none() {
            node.generated_url = Some(url.clone());
        }
        Ok(url)
    }

    // ------------------------------------------------------------------------
    // Cooking
    // ------------------------------------------------------------------------

    /// Cook `url` unless its node is already valid.
    ///
    /// Returned as a boxed future so inline resources can be cooked from
    /// inside a cook.
    pub fn cook(self: &Arc<Self>, url: Url) -> BoxFuture<CookResult> {
        let kitchen = Arc::clone(self);
        Box::pin(async move { kitchen.cook_shared(url).await })
    }

    async fn cook_shared(self: Arc<Self>, url: Url) -> CookResult {
        loop {
            if let Some(result) = self.settled(&url) {
                return result;
            }
            match self.claim(&url) {
                Claim::Wait(mut done) => {
                    let outcome = done.wait_for(Option::is_some).await.map(|result| result.clone());
                    match outcome {
                        Ok(Some(result)) => return result,
                        // owner dropped without finishing; claim again
                        _ => continue,
                    }
                }
                Claim::Own {
                    generation,
                    started,
                    done,
                } => {
                    let guard = PendingGuard {
                        kitchen: &self,
                        url: &url,
                        generation,
                    };
                    let result = match self.cook_once(&url, generation, started).await {
                        Some(result) => result,
                        None => self.cook(url.clone()).await,
                    };
                    done.send_replace(Some(result.clone()));
                    drop(guard);
                    return result;
                }
            }
        }
    }

    /// Result of a node that needs no cook.
    fn settled(&self, url: &Url) -> Option<CookResult> {
        let graph = self.graph.lock();
        let node = graph.get(url)?;
        let inline_changed = node.is_inline && node.inline_content != node.original_content;
        (node.is_valid() && !inline_changed).then_some(Ok(()))
    }

    fn claim(&self, url: &Url) -> Claim {
        let fresh = || {
            let generation = self.generation.fetch_add(1, Ordering::Relaxed);
            let started = timestamp::now();
            let (tx, rx) = watch::channel(None);
            let pending = PendingCook {
                generation,
                started,
                done: rx,
            };
            (
                Claim::Own {
                    generation,
                    started,
                    done: tx,
                },
                pending,
            )
        };

        match self.pending.entry(url.clone()) {
            dashmap::Entry::Occupied(mut entry) => {
                let pending = entry.get();
                let abandoned = pending.done.has_changed().is_err();
                if !abandoned && !self.is_stale(url, pending.started) {
                    return Claim::Wait(pending.done.clone());
                }
                debug!("kitchen"; "restarting stale cook of {}", url);
                let (claim, pending) = fresh();
                entry.insert(pending);
                claim
            }
            dashmap::Entry::Vacant(entry) => {
                let (claim, pending) = fresh();
                entry.insert(pending);
                claim
            }
        }
    }

    fn is_stale(&self, url: &Url, started: Timestamp) -> bool {
        self.graph
            .lock()
            .get(url)
            .and_then(|node| node.modified_timestamp)
            .is_some_and(|modified| modified >= started)
    }

    fn is_current(&self, url: &Url, generation: u64) -> bool {
        self.pending
            .get(url)
            .is_some_and(|pending| pending.generation == generation)
    }

    fn check_cancelled(&self) -> Result<(), Interrupt> {
        if self.context.signal.is_cancelled() {
            return Err(CookError::cancelled().into());
        }
        Ok(())
    }

    /// Run the pipeline once; `None` if a newer cook took over.
    async fn cook_once(self: &Arc<Self>, url: &Url, generation: u64, started: Timestamp) -> Option<CookResult> {
        self.cooks.fetch_add(1, Ordering::Relaxed);
        match self.run_pipeline(url, generation, started).await {
            Ok(()) | Err(Interrupt::Gone) => Some(Ok(())),
            Err(Interrupt::Superseded) => None,
            Err(Interrupt::Failed(error)) => {
                if let Some(node) = self.graph.lock().get_mut(url) {
                    node.error = Some(Arc::clone(&error));
                }
                debug!("kitchen"; "failed {}: {}", url, error);
                Some(Err(error))
            }
        }
    }

    async fn run_pipeline(self: &Arc<Self>, url: &Url, generation: u64, started: Timestamp) -> Result<(), Interrupt> {
        self.check_cancelled()?;
        let request = {
            let graph = self.graph.lock();
            let Some(node) = graph.get(url) else {
                return Err(Interrupt::Gone);
            };
            if !node.should_handle {
                drop(graph);
                return self.commit_cooked(url, generation, started, None);
            }
            FetchRequest {
                context: Arc::clone(&self.context),
                url: url.clone(),
                expected_type: node.url_type,
                is_inline: node.is_inline,
                inline_content: node.inline_content.clone(),
                content_type: node.content_type.clone(),
                trace: node.trace.clone(),
            }
        };
        let expected_type = request.expected_type;
        let inline_content_type = request.content_type.clone();

        let fetched = self.fetch_url_content(request).await?;
        self.check_cancelled()?;

        let content_type = fetched
            .content_type
            .clone()
            .or(inline_content_type)
            .unwrap_or_else(|| mime::from_url(url).to_string());
        let url_type = fetched
            .url_type
            .or(expected_type)
            .unwrap_or_else(|| mime::url_type(Some(content_type.as_str()), url));

        let transformed = match self.transform(url, url_type, &fetched).await {
            Ok(transformed) => transformed,
            Err(interrupt) => {
                if let Interrupt::Failed(_) = &interrupt {
                    self.record_partial(url, &fetched, url_type, &content_type);
                }
                return Err(interrupt);
            }
        };
        let content = transformed.content.clone();
        let sourcemap = transformed.sourcemap.clone();
        self.commit_transformed(url, generation, &fetched, url_type, content_type, transformed)?;

        self.check_cancelled()?;
        let finalized = self.finalize(url, url_type, content, sourcemap).await?;
        self.commit_cooked(url, generation, started, Some(finalized))
    }

    /// Ask fetch hooks for the content of `request.url`.
    pub async fn fetch_url_content(&self, request: FetchRequest) -> Result<Fetched, CookError> {
        let url = request.url.clone();
        let trace = request.trace.clone();
        match self.plugins.fetch.until_async(|hook| hook(request.clone())).await {
            Ok(Some((plugin, fetched))) => {
                debug!("kitchen"; "fetched {} via {}", url, plugin);
                Ok(fetched)
            }
            Ok(None) => Err(CookError::new(CookErrorKind::Fetch(FetchError::Unhandled(url.clone()))).with_url(&url)),
            Err((plugin, err)) => {
                let error = CookError::new(CookErrorKind::Fetch(err))
                    .with_url(&url)
                    .with_plugin(&plugin);
                Err(match trace {
                    Some(trace) if trace.url.is_some() => error.with_trace(trace),
                    _ => error,
                })
            }
        }
    }

    async fn transform(self: &Arc<Self>, url: &Url, url_type: UrlType, fetched: &Fetched) -> Result<Transformed, Interrupt> {
        let hooks = self.plugins.transform.for_type(Some(url_type));
        let mut content = fetched.content.clone();
        let mut sourcemap = fetched.sourcemap.clone();
        let mut references = Vec::new();
        let mut data = DataBag::default();

        for (plugin, hook) in hooks.iter() {
            self.check_cancelled()?;
            let (result, findings) = {
                let mut scope = TransformScope::new(self, url, url_type, &content);
                let result = hook(&mut scope);
                (result, scope.finish())
            };
            let Findings {
                references: found,
                inline,
                rewrites,
                errors,
                data: found_data,
            } = findings;

            let output = match result {
                Ok(output) => output,
                Err(err) => {
                    self.release(found.iter().chain(references.iter()));
                    let err = CookError::from_transform(err, url, content.as_text());
                    return Err(err.with_plugin(plugin).into());
                }
            };
            if let Some(err) = errors.into_iter().next() {
                self.release(found.iter().chain(references.iter()));
                return Err(err.with_plugin(plugin).into());
            }
            if let Err(interrupt) = self.cook_inline(&inline).await {
                self.release(found.iter().chain(references.iter()));
                return Err(interrupt);
            }

            match output {
                Some(output) => {
                    content = output.content;
                    if output.sourcemap.is_some() {
                        sourcemap = output.sourcemap;
                    }
                }
                None => content = self.apply_rewrites(content, rewrites),
            }
            references.extend(found);
            data.merge(found_data);
        }

        Ok(Transformed {
            content,
            sourcemap,
            references,
            data,
        })
    }

    /// Cook inline children concurrently; the parent waits for all of them.
    async fn cook_inline(self: &Arc<Self>, urls: &[Url]) -> Result<(), Interrupt> {
        let handles: Vec<_> = urls.iter().map(|url| tokio::spawn(self.cook(url.clone()))).collect();
        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
                Err(_) => {
                    first_error.get_or_insert_with(|| Arc::new(CookError::cancelled()));
                }
            }
        }
        match first_error {
            Some(err) => Err(Interrupt::Failed(err)),
            None => Ok(()),
        }
    }

    /// Splice replacements into text content, last span first.
    fn apply_rewrites(&self, content: Content, mut rewrites: Vec<Rewrite>) -> Content {
        let Content::Text(mut text) = content else {
            return content;
        };
        if rewrites.is_empty() {
            return Content::Text(text);
        }
        rewrites.sort_by(|a, b| b.span.start.cmp(&a.span.start));

        let graph = self.graph.lock();
        let mut floor = text.len();
        for rewrite in rewrites {
            let span = rewrite.span;
            if span.end > floor || span.start > span.end || !text.is_char_boundary(span.start) || !text.is_char_boundary(span.end) {
                continue;
            }
            let replacement = match &rewrite.replacement {
                Replacement::Specifier(id) => graph.reference(*id).and_then(|r| r.generated_specifier.clone()),
                Replacement::Inline(url) => graph
                    .get(url)
                    .and_then(|node| node.content.as_ref())
                    .and_then(|content| content.as_text())
                    .map(str::to_owned),
                Replacement::Text(text) => Some(text.clone()),
            };
            if let Some(replacement) = replacement {
                text.replace_range(span.clone(), &replacement);
            }
            floor = span.start;
        }
        Content::Text(text)
    }

    async fn finalize(
        &self,
        url: &Url,
        url_type: UrlType,
        content: Content,
        sourcemap: Option<String>,
    ) -> Result<(Content, Option<String>), Interrupt> {
        let hooks = self.plugins.finalize.for_type(Some(url_type));
        if hooks.is_empty() {
            return Ok((content, sourcemap));
        }
        let request = FinalizeRequest {
            context: Arc::clone(&self.context),
            url: url.clone(),
            url_type: Some(url_type),
            content: content.clone(),
            sourcemap: sourcemap.clone(),
        };
        match hooks.until_async(|hook| hook(request.clone())).await {
            Ok(Some((_, output))) => Ok((output.content, output.sourcemap.or(sourcemap))),
            Ok(None) => Ok((content, sourcemap)),
            Err((plugin, err)) => Err(CookError::new(CookErrorKind::Finalize(err.to_string()))
                .with_url(url)
                .with_plugin(&plugin)
                .into()),
        }
    }

    // ------------------------------------------------------------------------
    // Commits
    // ------------------------------------------------------------------------

    fn release<'a>(&self, ids: impl Iterator<Item = &'a ReferenceId>) {
        let mut graph = self.graph.lock();
        for id in ids {
            graph.references_mut().release(*id);
        }
    }

    /// Keep what was fetched so a failed transform can still be served.
    fn record_partial(&self, url: &Url, fetched: &Fetched, url_type: UrlType, content_type: &str) {
        let mut graph = self.graph.lock();
        if let Some(node) = graph.get_mut(url) {
            node.original_content_etag = Some(fetched.content.hash().etag());
            node.content_etag = node.original_content_etag.clone();
            node.original_content = Some(fetched.content.clone());
            node.content = Some(fetched.content.clone());
            node.url_type = Some(url_type);
            node.content_type = Some(content_type.to_string());
        }
    }

    fn commit_transformed(
        &self,
        url: &Url,
        generation: u64,
        fetched: &Fetched,
        url_type: UrlType,
        content_type: String,
        transformed: Transformed,
    ) -> Result<(), Interrupt> {
        if !self.is_current(url, generation) {
            self.release(transformed.references.iter());
            return Err(Interrupt::Superseded);
        }
        let mut graph = self.graph.lock();
        let Some(node) = graph.get_mut(url) else {
            for id in &transformed.references {
                graph.references_mut().release(*id);
            }
            return Err(Interrupt::Gone);
        };
        node.original_content_etag = Some(fetched.content.hash().etag());
        node.original_content = Some(fetched.content.clone());
        node.content = Some(transformed.content);
        node.sourcemap = transformed.sourcemap;
        node.content_type = Some(content_type);
        node.url_type = Some(url_type);
        if fetched.subtype.is_some() {
            node.subtype = fetched.subtype;
        }
        if fetched.filename_hint.is_some() {
            node.filename_hint = fetched.filename_hint.clone();
        }
        node.headers = fetched.headers.clone();
        node.data.merge(transformed.data);
        node.state = CookState::Transformed;
        graph.update_references(url, transformed.references);
        Ok(())
    }

    fn commit_cooked(
        &self,
        url: &Url,
        generation: u64,
        started: Timestamp,
        finalized: Option<(Content, Option<String>)>,
    ) -> Result<(), Interrupt> {
        if !self.is_current(url, generation) {
            return Err(Interrupt::Superseded);
        }
        let mut graph = self.graph.lock();
        let Some(node) = graph.get_mut(url) else {
            return Err(Interrupt::Gone);
        };
        if let Some((content, sourcemap)) = finalized {
            node.content_etag = Some(content.hash().etag());
            node.content = Some(content);
            node.sourcemap = sourcemap;
        }
        node.state = CookState::Cooked;
        node.error = None;
        node.cook_started = Some(started);

        let callbacks = match graph.get(url) {
            Some(node) => {
                let mut scope = CookedScope::new(&self.context, node);
                self.plugins.cooked.notify_all(|_, hook| hook(&mut scope));
                scope.finish()
            }
            None => Vec::new(),
        };
        for callback in callbacks {
            graph.once_pruned(url, callback);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Targets of `url`'s references a graph loader should cook next.
    pub fn dependencies_to_load(&self, url: &Url, ignore_dynamic: bool) -> Vec<Url> {
        let graph = self.graph.lock();
        let mut seen = rustc_hash::FxHashSet::default();
        graph
            .references_of(url)
            .filter(|r| r.is_dependency() && !(ignore_dynamic && r.kind.is_dynamic()))
            .filter_map(|r| r.url.clone())
            .filter(|target| {
                graph
                    .get(target)
                    .is_some_and(|node| node.should_handle && !node.is_inline)
            })
            .filter(|target| seen.insert(target.clone()))
            .collect()
    }

    /// Headers for serving `url`: fetched headers plus plugin injections.
    pub fn response_headers(&self, url: &Url) -> Vec<(String, String)> {
        let graph = self.graph.lock();
        let Some(node) = graph.get(url) else {
            return Vec::new();
        };
        let mut headers = node.headers.clone();
        self.plugins.headers.notify_all(|_, hook| {
            if let Some(extra) = hook(&self.context, node) {
                headers.extend(extra);
            }
        });
        headers
    }
}

/// Specifier written when no format hook answers.
///
/// Handled URLs under the root become server-relative (`/dir/file.js`);
/// anything else keeps what the author wrote.
fn default_specifier(context: &KitchenContext, reference: &Reference) -> String {
    match &reference.generated_url {
        Some(url) if context.should_handle(url) => context.server_path(url),
        _ => reference.specifier.clone(),
    }
}
