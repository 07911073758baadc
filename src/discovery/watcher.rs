//! Directory watches for test container changes.
//!
//! [`WatchSet`] owns zero or more (directory, glob pattern) watches, each backed by its own
//! native `notify` watcher, and funnels every matching filesystem event into one broadcast
//! stream of [`WatchChange`] hints. Consumers never learn which file changed; a change only
//! means "the container list may be stale".

use notify::{
    event::ModifyKind, Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors that can occur while attaching a watch.
///
/// These never escape [`WatchSet::add_watch`]; they are logged and recorded as failed watches.
#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("Invalid watch pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Failed to create watcher: {0}")]
    WatcherCreation(#[source] notify::Error),

    #[error("Failed to watch path {path}: {source}")]
    WatchPath {
        path: PathBuf,
        source: notify::Error,
    },
}

/// Simplified kinds of filesystem activity that count as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileChangeKind {
    Create,
    Modify,
    Remove,
    Rename,
}

impl FileChangeKind {
    /// Map a notify event kind; access events are not changes.
    fn classify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(FileChangeKind::Create),
            EventKind::Modify(ModifyKind::Name(_)) => Some(FileChangeKind::Rename),
            EventKind::Modify(_) => Some(FileChangeKind::Modify),
            EventKind::Remove(_) => Some(FileChangeKind::Remove),
            EventKind::Access(_) => None,
            EventKind::Any | EventKind::Other => Some(FileChangeKind::Modify),
        }
    }
}

/// Hint that something under a watched directory changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchChange {
    pub kind: FileChangeKind,
}

/// One active watch. Dropping it releases the OS handle.
struct WatchEntry {
    directory: PathBuf,
    pattern: String,
    _watcher: RecommendedWatcher,
}

/// A set of directory watches sharing one change stream.
///
/// Callbacks run on notify's background threads. They only ever send on the broadcast
/// channel, after checking the set's generation under a read lock. [`WatchSet::clear`] bumps the
/// generation under the write lock before dropping handles, so once it returns no callback of a
/// cleared watch can deliver anything.
pub struct WatchSet {
    entries: Vec<WatchEntry>,
    failed: Vec<(PathBuf, String)>,
    generation: Arc<RwLock<u64>>,
    changed: broadcast::Sender<WatchChange>,
}

impl WatchSet {
    /// Creates an empty watch set.
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the change broadcast buffer
    ///
    /// # Returns
    /// A tuple of (watch set, receiver) where receiver gets change hints.
    pub fn new(buffer_size: usize) -> (Self, broadcast::Receiver<WatchChange>) {
        let (changed, receiver) = broadcast::channel(buffer_size.max(1));

        (
            Self {
                entries: Vec::new(),
                failed: Vec::new(),
                generation: Arc::new(RwLock::new(0)),
                changed,
            },
            receiver,
        )
    }

    /// Start watching `directory` for files matching `pattern`.
    ///
    /// Returns `false` when the watch could not be attached (missing directory, bad pattern, or
    /// an OS refusal). The failure is logged and listed by [`WatchSet::failed`] until the next
    /// [`WatchSet::clear`].
    pub fn add_watch(&mut self, directory: &Path, pattern: &str) -> bool {
        match self.attach(directory, pattern) {
            Ok(entry) => {
                tracing::debug!("Watching {} for {}", directory.display(), pattern);
                self.entries.push(entry);
                true
            }
            Err(e) => {
                tracing::warn!("Skipping watch on {} ({}): {}", directory.display(), pattern, e);
                self.failed
                    .push((directory.to_path_buf(), pattern.to_string()));
                false
            }
        }
    }

    fn attach(&self, directory: &Path, pattern: &str) -> Result<WatchEntry, WatcherError> {
        if !directory.is_dir() {
            return Err(WatcherError::MissingDirectory(directory.to_path_buf()));
        }

        let matcher = glob::Pattern::new(pattern).map_err(|source| WatcherError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let armed_at = *self
            .generation
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let gate = Arc::clone(&self.generation);
        let sender = self.changed.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let event = match res {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!("Watcher reported an error: {}", e);
                        return;
                    }
                };
                let Some(kind) = FileChangeKind::classify(&event.kind) else {
                    return;
                };
                if !event.paths.iter().any(|path| matches_file_name(&matcher, path)) {
                    return;
                }

                let generation = gate.read().unwrap_or_else(PoisonError::into_inner);
                if *generation == armed_at {
                    // No receivers is fine; the hint is simply dropped.
                    let _ = sender.send(WatchChange { kind });
                }
            },
            Config::default(),
        )
        .map_err(WatcherError::WatcherCreation)?;

        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(|e| WatcherError::WatchPath {
                path: directory.to_path_buf(),
                source: e,
            })?;

        Ok(WatchEntry {
            directory: directory.to_path_buf(),
            pattern: pattern.to_string(),
            _watcher: watcher,
        })
    }

    /// Stop and release every watch. Safe to call on an empty set.
    pub fn clear(&mut self) {
        {
            let mut generation = self
                .generation
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *generation = generation.wrapping_add(1);
        }

        if !self.entries.is_empty() {
            tracing::debug!("Releasing {} watches", self.entries.len());
        }
        self.entries.clear();
        self.failed.clear();
    }

    /// Active (directory, pattern) pairs, sorted for determinism.
    pub fn entries(&self) -> Vec<(PathBuf, String)> {
        let mut out: Vec<(PathBuf, String)> = self
            .entries
            .iter()
            .map(|e| (e.directory.clone(), e.pattern.clone()))
            .collect();
        out.sort();
        out
    }

    /// Watches whose last attachment attempt failed.
    pub fn failed(&self) -> &[(PathBuf, String)] {
        &self.failed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribe a new listener to change hints.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchChange> {
        self.changed.subscribe()
    }

    /// Sender side of the change stream, for components that relay hints.
    pub(crate) fn sender(&self) -> broadcast::Sender<WatchChange> {
        self.changed.clone()
    }
}

impl Drop for WatchSet {
    fn drop(&mut self) {
        self.clear();
    }
}

fn matches_file_name(pattern: &glob::Pattern, path: &Path) -> bool {
    let options = glob::MatchOptions {
        case_sensitive: !cfg!(windows),
        ..glob::MatchOptions::new()
    };

    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| pattern.matches_with(name, options))
}
