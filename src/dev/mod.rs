//! Development server.
//!
//! Each client runtime gets its own kitchen, cooking on request. File
//! changes invalidate nodes in every kitchen and are turned into hot
//! reload messages for the clients of that runtime.
//!
//! ```text
//! browser ──request──► handle_request ──► kitchen[runtime].cook ──► DevResponse
//! watcher ──change───► file_changed ────► consider_modified ──► propagate ──► HotEvent
//! ```
//!
//! Transports live in [`http`] (HTTP + hot reload WebSocket) and
//! [`watch`] (filesystem events); the server itself only deals in paths,
//! responses and messages.

pub mod http;
mod response;
pub mod watch;


pub use response::DevResponse;
pub use watch::{ChangeKind, FileWatcher};

use std::path::Path;
use std::sync::Arc;

use crossbeam::channel;
use dashmap::DashMap;
use regex::Regex;
use tokio::sync::broadcast;
use url::Url;

use crate::content::Content;
use crate::hmr::{self, HotMeta, HotReloadMessage, PruneSummary};
use crate::kitchen::Kitchen;
use crate::plugin::{KitchenContext, Phase, Plugin};
use crate::utils::{mime, plural::plural_count, timestamp};
use crate::{debug, logger};

/// Messages kept for clients that fall behind.
const HOT_CHANNEL_CAPACITY: usize = 64;

/// Runtime used when a client cannot be identified.
pub const DEFAULT_RUNTIME: &str = "default";

/// Settings shared by every dev kitchen.
#[derive(Debug, Clone)]
pub struct DevOptions {
    pub root_directory_url: Url,
    pub ignore: Vec<Regex>,
    pub handle_http: bool,
    /// A file watcher reports changes. Without one every request
    /// re-checks its source before answering.
    pub watch: bool,
}

impl DevOptions {
    pub fn new(root_directory_url: Url) -> Self {
        Self {
            root_directory_url,
            ignore: Vec::new(),
            handle_http: false,
            watch: true,
        }
    }
}

/// A hot reload message for the clients of one runtime.
#[derive(Debug, Clone)]
pub struct HotEvent {
    pub runtime: String,
    pub message: HotReloadMessage,
}

type PluginFactory = Box<dyn Fn() -> Vec<Plugin> + Send + Sync>;

pub struct DevServer {
    options: DevOptions,
    plugins: PluginFactory,
    kitchens: DashMap<String, Arc<Kitchen>>,
    hot: broadcast::Sender<HotEvent>,
    pruned_tx: channel::Sender<(String, PruneSummary)>,
    pruned_rx: channel::Receiver<(String, PruneSummary)>,
}

impl std::fmt::Debug for DevServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevServer")
            .field("root", &self.options.root_directory_url.as_str())
            .field("runtimes", &self.kitchens.len())
            .finish_non_exhaustive()
    }
}

impl DevServer {
    /// `plugins` is called once per runtime, since kitchens never share plugins.
    pub fn new(options: DevOptions, plugins: impl Fn() -> Vec<Plugin> + Send + Sync + 'static) -> Self {
        let (hot, _) = broadcast::channel(HOT_CHANNEL_CAPACITY);
        let (pruned_tx, pruned_rx) = channel::unbounded();
        Self {
            options,
            plugins: Box::new(plugins),
            kitchens: DashMap::new(),
            hot,
            pruned_tx,
            pruned_rx,
        }
    }

    pub fn options(&self) -> &DevOptions {
        &self.options
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HotEvent> {
        self.hot.subscribe()
    }

    /// Kitchen of `runtime`, created on first use.
    pub fn kitchen(&self, runtime: &str) -> Arc<Kitchen> {
        if let Some(kitchen) = self.kitchens.get(runtime) {
            return Arc::clone(&kitchen);
        }
        let entry = self.kitchens.entry(runtime.to_string()).or_insert_with(|| {
            let context = KitchenContext::new(Phase::Dev, self.options.root_directory_url.clone())
                .with_runtime(runtime)
                .with_ignore(self.options.ignore.clone())
                .with_handle_http(self.options.handle_http);
            let kitchen = Kitchen::new(context, (self.plugins)());

            let tx = self.pruned_tx.clone();
            let owner = runtime.to_string();
            kitchen.graph().on_pruned(move |event| {
                let _ = tx.send((owner.clone(), PruneSummary::from_event(event)));
            });
            debug!("serve"; "new kitchen for runtime {}", runtime);
            kitchen
        });
        Arc::clone(&entry)
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Answer a request for `path` from a client of `runtime`.
    ///
    /// `if_none_match` is the etag the client cached; a 304 is only sent
    /// when it matches a node that is still valid.
    pub async fn handle_request(&self, path: &str, runtime: &str, if_none_match: Option<&str>) -> DevResponse {
        let kitchen = self.kitchen(runtime);
        let url = match kitchen.resolve_request(path) {
            Ok(url) => url,
            Err(err) => {
                debug!("serve"; "cannot resolve {}: {}", path, err);
                return DevResponse::error(&err);
            }
        };

        if !self.options.watch {
            // nothing reports changes, so the source is fetched again
            kitchen.graph().consider_modified(&url, timestamp::now(), |_| true);
        }

        if let Some(etag) = if_none_match
            && let Some(current) = current_etag(&kitchen, &url)
            && current == etag
        {
            return DevResponse::not_modified(current);
        }

        let result = kitchen.cook(url.clone()).await;
        self.propagate_pruned();

        match result {
            Ok(()) => match current_etag(&kitchen, &url) {
                Some(current) if if_none_match == Some(current.as_str()) => DevResponse::not_modified(current),
                _ => serve_cooked(&kitchen, &url),
            },
            Err(err) if err.is_parse_error() => {
                logger::status_error(&format!("failed to cook {path}"), &err.to_string());
                self.broadcast(runtime, HotReloadMessage::error(path, err.to_string()));
                let (content, content_type) = best_effort(&kitchen, &url);
                DevResponse::parse_error(content, &content_type, &err)
                    .with_headers(kitchen.response_headers(&url))
            }
            Err(err) => {
                if !err.is_cancelled() {
                    debug!("serve"; "{} failed: {}", path, err);
                }
                DevResponse::error(&err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Changes
    // ------------------------------------------------------------------------

    /// React to a change of the file at `path` in every runtime.
    ///
    /// Returns the messages sent, one per runtime whose graph knew the file.
    pub fn file_changed(&self, path: &Path, kind: ChangeKind) -> Vec<HotEvent> {
        let Ok(url) = Url::from_file_path(path) else {
            return Vec::new();
        };
        let timestamp = timestamp::now();
        let kitchens: Vec<(String, Arc<Kitchen>)> = self
            .kitchens
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut events = Vec::new();
        for (runtime, kitchen) in kitchens {
            let message = {
                let mut graph = kitchen.graph();
                let marked = graph.consider_modified(&url, timestamp, |info| HotMeta::of(info).accept_self);
                if marked.is_empty() {
                    continue;
                }
                debug!("watch"; "{} {}: {} node(s) invalidated for {}", kind.label(), url, marked.len(), runtime);
                let update = hmr::propagate_update(&graph, &url);
                HotReloadMessage::from_update(&update, kitchen.context(), timestamp)
            };
            log_message(&kitchen.context().server_path(&url), &message);
            events.push(self.broadcast(&runtime, message));
        }
        if events.is_empty() {
            logger::status_unchanged(&format!("{} {}: not loaded by any client", kind.label(), path.display()));
        }
        self.propagate_pruned();
        events
    }

    /// Turn prune events collected by the graph listeners into messages.
    fn propagate_pruned(&self) {
        for (runtime, summary) in self.pruned_rx.try_iter() {
            let Some(kitchen) = self.kitchens.get(&runtime).map(|k| Arc::clone(&k)) else {
                continue;
            };
            let message = {
                let graph = kitchen.graph();
                let update = hmr::propagate_prune(&graph, &summary);
                HotReloadMessage::from_update(&update, kitchen.context(), timestamp::now())
            };
            debug!("hmr"; "{} pruned below {}", summary.pruned.len(), summary.trigger);
            self.broadcast(&runtime, message);
        }
    }

    fn broadcast(&self, runtime: &str, message: HotReloadMessage) -> HotEvent {
        let event = HotEvent {
            runtime: runtime.to_string(),
            message,
        };
        // no subscribers is fine
        let _ = self.hot.send(event.clone());
        event
    }
}

fn serve_cooked(kitchen: &Kitchen, url: &Url) -> DevResponse {
    let (content, content_type, etag) = {
        let graph = kitchen.graph();
        match graph.get(url) {
            Some(node) => (
                node.content.clone().unwrap_or_default(),
                node.content_type
                    .clone()
                    .unwrap_or_else(|| mime::from_url(url).to_string()),
                node.etag(),
            ),
            // pruned between cook and serve
            None => (Content::default(), mime::from_url(url).to_string(), None),
        }
    };
    DevResponse::ok(content, &content_type, etag).with_headers(kitchen.response_headers(url))
}

/// Etag of `url` if its node is cooked and unchanged since.
fn current_etag(kitchen: &Kitchen, url: &Url) -> Option<String> {
    let graph = kitchen.graph();
    let node = graph.get(url)?;
    if node.is_valid() { node.etag() } else { None }
}

/// Whatever content a failed node got to.
fn best_effort(kitchen: &Kitchen, url: &Url) -> (Content, String) {
    let graph = kitchen.graph();
    let Some(node) = graph.get(url) else {
        return (Content::default(), mime::from_url(url).to_string());
    };
    let content = node
        .content
        .clone()
        .or_else(|| node.original_content.clone())
        .unwrap_or_default();
    let content_type = node
        .content_type
        .clone()
        .unwrap_or_else(|| mime::from_url(url).to_string());
    (content, content_type)
}

fn log_message(path: &str, message: &HotReloadMessage) {
    match message {
        HotReloadMessage::Hot { instructions, .. } => {
            logger::status_success(&format!(
                "{path}: hot update ({})",
                plural_count(instructions.len(), "boundary")
            ));
        }
        HotReloadMessage::Full { reason, .. } => {
            logger::status_warning(&format!(
                "{path}: full reload ({})",
                reason.as_deref().unwrap_or("no accepting boundary")
            ));
        }
        _ => {}
    }
}

/// Runtime id of a client from its `User-Agent`.
pub fn runtime_of(user_agent: Option<&str>) -> &'static str {
    let Some(agent) = user_agent else {
        return DEFAULT_RUNTIME;
    };
    if agent.contains("Firefox/") {
        "firefox"
    } else if agent.contains("Edg/") {
        "edge"
    } else if agent.contains("Chrome/") || agent.contains("Chromium/") {
        "chrome"
    } else if agent.contains("Safari/") {
        "safari"
    } else {
        DEFAULT_RUNTIME
    }
}
