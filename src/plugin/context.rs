//! What every hook can see about the kitchen it runs in.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use url::Url;

use crate::utils::urls;

/// Which pass a kitchen serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Dev,
    /// First build pass over source files
    Craft,
    /// Second build pass over crafted and bundled output
    Refine,
}

impl Phase {
    pub const fn is_build(self) -> bool {
        matches!(self, Self::Craft | Self::Refine)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Craft => "craft",
            Self::Refine => "refine",
        }
    }
}

/// Cooperative cancellation shared by a build and its kitchens.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only settings of one kitchen.
#[derive(Debug, Clone)]
pub struct KitchenContext {
    pub phase: Phase,
    pub root_directory_url: Url,
    pub build_directory_url: Option<Url>,
    /// Client runtime in dev (`chrome`, `firefox`); `build` otherwise
    pub runtime: String,
    pub signal: CancelSignal,
    /// URLs matching any pattern are never handled
    pub ignore: Vec<Regex>,
    /// Cook `http(s):` URLs instead of leaving them to the client
    pub handle_http: bool,
}

impl KitchenContext {
    pub fn new(phase: Phase, root_directory_url: Url) -> Self {
        Self {
            phase,
            root_directory_url: urls::as_directory(&root_directory_url),
            build_directory_url: None,
            runtime: if phase.is_build() { "build" } else { "default" }.to_string(),
            signal: CancelSignal::new(),
            ignore: Vec::new(),
            handle_http: false,
        }
    }

    pub fn with_build_directory(mut self, url: Url) -> Self {
        self.build_directory_url = Some(urls::as_directory(&url));
        self
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn with_signal(mut self, signal: CancelSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_ignore(mut self, ignore: Vec<Regex>) -> Self {
        self.ignore = ignore;
        self
    }

    pub fn with_handle_http(mut self, handle_http: bool) -> Self {
        self.handle_http = handle_http;
        self
    }

    pub fn is_dev(&self) -> bool {
        self.phase == Phase::Dev
    }

    /// Whether the kitchen cooks this URL or leaves it as an opaque leaf.
    pub fn should_handle(&self, url: &Url) -> bool {
        let scheme_ok = match url.scheme() {
            "file" => true,
            "http" | "https" => self.handle_http,
            _ => false,
        };
        scheme_ok && !self.ignore.iter().any(|re| re.is_match(url.as_str()))
    }

    /// Server-relative path of a URL under the root directory.
    pub fn server_path(&self, url: &Url) -> String {
        urls::server_relative(url, &self.root_directory_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> KitchenContext {
        KitchenContext::new(Phase::Dev, Url::parse("file:///app").unwrap())
    }

    #[test]
    fn test_root_becomes_directory() {
        assert_eq!(ctx().root_directory_url.as_str(), "file:///app/");
    }

    #[test]
    fn test_should_handle() {
        let mut context = ctx();
        let file = Url::parse("file:///app/main.js").unwrap();
        let cdn = Url::parse("https://cdn.example.com/lib.js").unwrap();
        let data = Url::parse("data:text/plain,hi").unwrap();
        let mail = Url::parse("mailto:me@example.com").unwrap();

        assert!(context.should_handle(&file));
        assert!(!context.should_handle(&cdn));
        assert!(!context.should_handle(&data));
        assert!(!context.should_handle(&mail));

        context.handle_http = true;
        assert!(context.should_handle(&cdn));

        context.ignore = vec![Regex::new(r"/vendor/").unwrap()];
        assert!(!context.should_handle(&Url::parse("file:///app/vendor/x.js").unwrap()));
    }

    #[test]
    fn test_cancel_signal_is_shared() {
        let signal = CancelSignal::new();
        let context = ctx().with_signal(signal.clone());
        assert!(!context.signal.is_cancelled());
        signal.cancel();
        assert!(context.signal.is_cancelled());
    }
}
