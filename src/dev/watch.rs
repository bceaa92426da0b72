//! Filesystem watcher feeding the dev server.
//!
//! ```text
//! notify ──► thread ──► mpsc ──► Debouncer ──► DevServer::file_changed
//! ```
//!
//! The watcher starts before the first request is served, so nothing
//! changed in between is missed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use super::DevServer;
use crate::{debug, log};

pub(super) const DEBOUNCE_MS: u64 = 100;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

// ============================================================================
// Debouncer
// ============================================================================

/// Collects raw events until the filesystem has been quiet for a while.
#[derive(Debug, Default)]
pub(super) struct Debouncer {
    changes: FxHashMap<PathBuf, ChangeKind>,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Record a notify event.
    ///
    /// - Removed then created: the file was rewritten in place → modified
    /// - Modified then removed → removed
    /// - Created then removed within the window → nothing happened
    /// - otherwise the first event wins
    pub(super) fn add_event(&mut self, event: &notify::Event) {
        let kind = match event.kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Remove(_) => ChangeKind::Removed,
            // mtime/chmod noise
            EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => return,
            EventKind::Modify(_) => ChangeKind::Modified,
            _ => return,
        };

        for path in event.paths.iter().filter(|path| !is_temp_file(path)) {
            match (self.changes.get(path).copied(), kind) {
                (None, kind) => {
                    self.changes.insert(path.clone(), kind);
                }
                (Some(ChangeKind::Removed), ChangeKind::Created | ChangeKind::Modified) => {
                    debug!("watch"; "rewritten: {}", path.display());
                    self.changes.insert(path.clone(), ChangeKind::Modified);
                }
                (Some(ChangeKind::Modified), ChangeKind::Removed) => {
                    self.changes.insert(path.clone(), ChangeKind::Removed);
                }
                (Some(ChangeKind::Created), ChangeKind::Removed) => {
                    self.changes.remove(path);
                }
                _ => continue,
            }
            self.last_event = Some(Instant::now());
        }
    }

    pub(super) fn is_ready(&self) -> bool {
        self.last_event
            .is_some_and(|last| last.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    /// Changes collected so far, once the quiet period is over.
    pub(super) fn take_if_ready(&mut self) -> Option<Vec<(PathBuf, ChangeKind)>> {
        if !self.is_ready() {
            return None;
        }
        self.last_event = None;
        let mut changes: Vec<_> = self.changes.drain().collect();
        if changes.is_empty() {
            return None;
        }
        changes.sort();
        Some(changes)
    }

    /// How long to wait before the pending changes may be ready.
    pub(super) fn sleep_duration(&self) -> Duration {
        match self.last_event {
            Some(last) => Duration::from_millis(DEBOUNCE_MS)
                .saturating_sub(last.elapsed())
                .max(Duration::from_millis(1)),
            None => Duration::from_secs(86400),
        }
    }
}

/// Editor artifacts and dotfiles.
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

// ============================================================================
// FileWatcher
// ============================================================================

/// Watches a directory tree and reports changes to a [`DevServer`].
pub struct FileWatcher {
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    /// Dropping the watcher stops events
    watcher: RecommendedWatcher,
    dev: Arc<DevServer>,
}

impl FileWatcher {
    /// Start watching `root` right away; events buffer until [`run`](Self::run).
    pub fn new(root: &Path, dev: Arc<DevServer>) -> notify::Result<Self> {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!("watch"; "watching {}", root.display());
        Ok(Self {
            notify_rx,
            watcher,
            dev,
        })
    }

    /// Forward debounced changes until the event source closes.
    pub async fn run(self) {
        let Self {
            notify_rx,
            watcher,
            dev,
        } = self;
        let (async_tx, mut async_rx) = mpsc::channel::<notify::Event>(64);

        // notify is sync; bridge it onto the runtime
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if async_tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => log!("watch"; "notify error: {}", e),
                }
            }
        });

        let mut debouncer = Debouncer::new();
        loop {
            tokio::select! {
                biased;
                event = async_rx.recv() => match event {
                    Some(event) => debouncer.add_event(&event),
                    None => break,
                },
                () = tokio::time::sleep(debouncer.sleep_duration()) => {
                    let Some(changes) = debouncer.take_if_ready() else { continue };
                    for (path, kind) in changes {
                        debug!("watch"; "{}: {}", kind.label(), path.display());
                        dev.file_changed(&path, kind);
                    }
                }
            }
        }
        drop(watcher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(paths: &[&str], kind: EventKind) -> notify::Event {
        notify::Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    fn modify() -> EventKind {
        EventKind::Modify(notify::event::ModifyKind::Data(notify::event::DataChange::Any))
    }

    fn create() -> EventKind {
        EventKind::Create(notify::event::CreateKind::File)
    }

    fn remove() -> EventKind {
        EventKind::Remove(notify::event::RemoveKind::File)
    }

    fn settle(debouncer: &mut Debouncer) -> Vec<(PathBuf, ChangeKind)> {
        std::thread::sleep(Duration::from_millis(DEBOUNCE_MS + 20));
        debouncer.take_if_ready().unwrap_or_default()
    }

    #[test]
    fn test_empty_is_never_ready() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.is_ready());
        assert!(debouncer.take_if_ready().is_none());
        assert_eq!(debouncer.sleep_duration(), Duration::from_secs(86400));
    }

    #[test]
    fn test_waits_for_quiet_period() {
        let mut debouncer = Debouncer::new();
        debouncer.add_event(&event(&["/app/a.js"], modify()));
        assert!(debouncer.take_if_ready().is_none());
        assert!(debouncer.sleep_duration() <= Duration::from_millis(DEBOUNCE_MS));
        assert_eq!(settle(&mut debouncer), vec![(PathBuf::from("/app/a.js"), ChangeKind::Modified)]);
    }

    #[test]
    fn test_remove_then_create_is_modify() {
        let mut debouncer = Debouncer::new();
        debouncer.add_event(&event(&["/app/a.js"], remove()));
        debouncer.add_event(&event(&["/app/a.js"], create()));
        assert_eq!(settle(&mut debouncer), vec![(PathBuf::from("/app/a.js"), ChangeKind::Modified)]);
    }

    #[test]
    fn test_create_then_remove_discards() {
        let mut debouncer = Debouncer::new();
        debouncer.add_event(&event(&["/app/a.js"], create()));
        debouncer.add_event(&event(&["/app/a.js"], remove()));
        assert!(settle(&mut debouncer).is_empty());
    }

    #[test]
    fn test_modify_then_remove_upgrades() {
        let mut debouncer = Debouncer::new();
        debouncer.add_event(&event(&["/app/a.js"], modify()));
        debouncer.add_event(&event(&["/app/a.js"], remove()));
        assert_eq!(settle(&mut debouncer), vec![(PathBuf::from("/app/a.js"), ChangeKind::Removed)]);
    }

    #[test]
    fn test_noise_is_ignored() {
        let mut debouncer = Debouncer::new();
        let metadata = EventKind::Modify(notify::event::ModifyKind::Metadata(notify::event::MetadataKind::Any));
        debouncer.add_event(&event(&["/app/a.js"], metadata));
        debouncer.add_event(&event(&["/app/a.js.swp", "/app/.DS_Store", "/app/b.js~"], modify()));
        assert!(!debouncer.is_ready());
        assert!(settle(&mut debouncer).is_empty());
    }
}
