//! In-memory files, for embedding and tests.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use url::Url;

use crate::content::Content;
use crate::error::FetchError;
use crate::plugin::{Fetched, Plugin};
use crate::utils::{mime, urls};

#[derive(Debug, Clone)]
enum Entry {
    File(Content),
    Denied,
    Busy,
}

#[derive(Debug, Default)]
struct Store {
    entries: FxHashMap<Url, Entry>,
    fetches: FxHashMap<Url, usize>,
}

/// A set of files served by URL, counting every fetch.
///
/// Cloning shares the files, so a test can keep a handle and edit
/// files while a kitchen reads them through [`MemoryFiles::plugin`].
#[derive(Debug, Clone)]
pub struct MemoryFiles {
    root: Url,
    store: Arc<Mutex<Store>>,
    delay: Option<Duration>,
}

impl MemoryFiles {
    pub fn new(root: &Url) -> Self {
        Self {
            root: urls::as_directory(root),
            store: Arc::default(),
            delay: None,
        }
    }

    /// Sleep this long in every fetch, to widen race windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn url(&self, path: &str) -> Url {
        self.root
            .join(path.trim_start_matches('/'))
            .unwrap_or_else(|_| self.root.clone())
    }

    pub fn insert(&self, path: &str, content: impl Into<Content>) -> Url {
        let url = self.url(path);
        self.store.lock().entries.insert(url.clone(), Entry::File(content.into()));
        url
    }

    pub fn remove(&self, path: &str) {
        let url = self.url(path);
        self.store.lock().entries.remove(&url);
    }

    /// Make `path` fail with permission denied.
    pub fn deny(&self, path: &str) {
        let url = self.url(path);
        self.store.lock().entries.insert(url, Entry::Denied);
    }

    /// Make `path` fail as busy.
    pub fn busy(&self, path: &str) {
        let url = self.url(path);
        self.store.lock().entries.insert(url, Entry::Busy);
    }

    /// Number of fetches of `path` so far.
    pub fn fetch_count(&self, path: &str) -> usize {
        let url = self.url(path);
        self.store.lock().fetches.get(&url).copied().unwrap_or(0)
    }

    fn fetch(&self, url: &Url) -> Result<Option<Fetched>, FetchError> {
        let key = urls::without_query(url);
        let mut store = self.store.lock();
        if !key.as_str().starts_with(self.root.as_str()) {
            return Ok(None);
        }
        *store.fetches.entry(key.clone()).or_default() += 1;
        match store.entries.get(&key) {
            Some(Entry::File(content)) => {
                Ok(Some(Fetched::new(content.clone()).with_content_type(mime::from_url(&key))))
            }
            Some(Entry::Denied) => Err(FetchError::PermissionDenied(url.clone())),
            Some(Entry::Busy) => Err(FetchError::Busy(url.clone())),
            None => Err(FetchError::NotFound(url.clone())),
        }
    }

    /// A low-priority fetch plugin over these files.
    pub fn plugin(&self) -> Plugin {
        let files = self.clone();
        Plugin::new("memory-fetch").low_priority().fetch_url_content(move |request| {
            let files = files.clone();
            async move {
                if request.is_inline {
                    return Ok(None);
                }
                if let Some(delay) = files.delay {
                    tokio::time::sleep(delay).await;
                }
                files.fetch(&request.url)
            }
        })
    }
}
