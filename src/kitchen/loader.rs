//! Drives a kitchen until every reachable resource is cooked.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tokio::task::JoinSet;
use url::Url;

use super::Kitchen;
use crate::debug;
use crate::error::{CookError, CookResult};

/// Cooks URLs and, as each finishes, the dependencies its transform found.
///
/// Each URL is loaded once per loader; concurrent cooks of the same URL
/// across loaders are shared by the kitchen itself.
pub struct GraphLoader {
    kitchen: Arc<Kitchen>,
    tasks: JoinSet<(Url, CookResult)>,
    seen: FxHashSet<Url>,
    ignore_dynamic_import: bool,
}

impl GraphLoader {
    pub fn new(kitchen: &Arc<Kitchen>) -> Self {
        Self {
            kitchen: Arc::clone(kitchen),
            tasks: JoinSet::new(),
            seen: FxHashSet::default(),
            ignore_dynamic_import: false,
        }
    }

    /// Leave dynamically imported resources to be fetched on demand.
    pub fn ignore_dynamic_import(mut self, ignore: bool) -> Self {
        self.ignore_dynamic_import = ignore;
        self
    }

    /// Start cooking `url` unless this loader already did.
    pub fn load(&mut self, url: Url) {
        if !self.seen.insert(url.clone()) {
            return;
        }
        let cook = self.kitchen.cook(url.clone());
        self.tasks.spawn(async move { (url, cook.await) });
    }

    /// Wait until nothing is in flight; the first failure aborts the rest.
    ///
    /// Returns how many URLs this loader cooked in total.
    pub async fn drain(&mut self) -> Result<usize, Arc<CookError>> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((url, Ok(()))) => {
                    for dependency in self.kitchen.dependencies_to_load(&url, self.ignore_dynamic_import) {
                        self.load(dependency);
                    }
                }
                Ok((url, Err(err))) => {
                    debug!("load"; "aborting after {} failed", url);
                    self.tasks.abort_all();
                    return Err(err);
                }
                Err(join) if join.is_panic() => {
                    self.tasks.abort_all();
                    std::panic::resume_unwind(join.into_panic());
                }
                Err(_) => {
                    self.tasks.abort_all();
                    return Err(Arc::new(CookError::cancelled()));
                }
            }
            if self.kitchen.context().signal.is_cancelled() {
                self.tasks.abort_all();
                return Err(Arc::new(CookError::cancelled()));
            }
        }
        Ok(self.seen.len())
    }
}
