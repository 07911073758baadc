//! The test container discoverer.
//!
//! [`Discoverer`] answers "what are the current test containers" for the host. Reads go through
//! the [`ContainerCache`]; on a miss the discoverer queries its [`ProjectSource`], keeps items
//! with the container extension that exist on disk, and re-arms directory watches for exactly
//! the directories those containers live in.
//!
//! Invalidation arrives on two channels, consumed by one background task:
//!
//! ```text
//! notify callback ──► WatchSet broadcast ──┐
//!                                          ├─► event loop ─► cache.invalidate() ─► ContainersUpdated
//! Solution::publish ─► lifecycle relay ────┘
//! ```
//!
//! The loop drains whatever is already queued before invalidating, so a burst of file events
//! costs one invalidation and one `ContainersUpdated`.

use crate::config::{DiscovererConfig, ExecutorUri};
use crate::discovery::cache::{CacheStats, ContainerCache, ContainerSnapshot};
use crate::discovery::container::TestContainer;
use crate::discovery::lifecycle::{
    AdviseCookie, EventStatus, Solution, SolutionEvent, SolutionEventListener, SolutionLifecycle,
};
use crate::discovery::project::ProjectSource;
use crate::discovery::watcher::{FileChangeKind, WatchChange, WatchSet};
use crate::error::Result;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Notification that the container list was invalidated. Re-query [`Discoverer::containers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainersUpdated;

/// Why the cache was invalidated; only used for logging.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    FileChange(FileChangeKind),
    MissedFileChanges(u64),
    Solution(SolutionEvent),
    Explicit,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::FileChange(kind) => write!(f, "file {:?}", kind),
            Trigger::MissedFileChanges(n) => write!(f, "{} missed file changes", n),
            Trigger::Solution(event) => write!(f, "{:?}", event),
            Trigger::Explicit => f.write_str("explicit request"),
        }
    }
}

/// State shared between the discoverer handle and its event loop.
struct Inner {
    config: DiscovererConfig,
    projects: Arc<dyn ProjectSource>,
    cache: ContainerCache,
    updated: broadcast::Sender<ContainersUpdated>,
    disposed: AtomicBool,
}

impl Inner {
    /// Full recompute. Runs under the cache lock.
    fn collect(&self, watches: &mut WatchSet) -> Vec<TestContainer> {
        if self.disposed.load(Ordering::SeqCst) {
            return Vec::new();
        }

        let projects = match self.projects.projects() {
            Ok(projects) => projects,
            Err(e) => {
                tracing::warn!("Failed to enumerate projects: {}", e);
                Vec::new()
            }
        };

        let uri = self.config.executor_uri();
        let mut containers = Vec::new();
        for project in projects {
            let items = match project.items() {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!("Skipping project {}: {}", project.name(), e);
                    continue;
                }
            };

            containers.extend(
                items
                    .into_iter()
                    .filter(|item| self.config.matches_extension(&item.to_string_lossy()))
                    .filter(|item| item.is_file())
                    .map(|item| TestContainer::new(uri.clone(), item)),
            );
        }

        let directories: BTreeSet<PathBuf> = containers
            .iter()
            .filter_map(TestContainer::directory)
            .map(Path::to_path_buf)
            .collect();

        watches.clear();
        for directory in &directories {
            for pattern in self.config.watched_file_patterns() {
                watches.add_watch(directory, pattern);
            }
        }

        tracing::debug!(
            "Discovered {} test containers in {} directories ({} watches) for {}",
            containers.len(),
            directories.len(),
            watches.len(),
            uri
        );

        containers
    }

    async fn invalidate(&self, trigger: Trigger) {
        let discarded = self.cache.invalidate().await;
        tracing::debug!(
            "Container cache invalidated by {} (snapshot dropped: {})",
            trigger,
            discarded
        );

        // Nobody listening is fine.
        let _ = self.updated.send(ContainersUpdated);
    }
}

/// Forwards topology-changing solution events to the event loop.
struct LifecycleRelay {
    tx: mpsc::UnboundedSender<SolutionEvent>,
}

impl SolutionEventListener for LifecycleRelay {
    fn on_event(&self, event: &SolutionEvent) -> EventStatus {
        if !event.invalidates_containers() {
            return EventStatus::Ok;
        }

        match self.tx.send(*event) {
            Ok(()) => EventStatus::Ok,
            Err(_) => EventStatus::Failed,
        }
    }
}

/// Discovers test containers for one executor and keeps them fresh.
pub struct Discoverer {
    inner: Arc<Inner>,
    lifecycle: Arc<dyn SolutionLifecycle>,
    cookie: Mutex<Option<AdviseCookie>>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    watch_events: broadcast::Sender<WatchChange>,
}

impl Discoverer {
    /// Create a discoverer and subscribe it to `lifecycle`.
    ///
    /// Must be called from within a tokio runtime: the event loop is spawned here.
    ///
    /// # Errors
    /// Fails if the lifecycle refuses the subscription; the discoverer cannot work without it.
    pub fn new(
        config: DiscovererConfig,
        projects: Arc<dyn ProjectSource>,
        lifecycle: Arc<dyn SolutionLifecycle>,
    ) -> Result<Self> {
        let (watches, watch_rx) = WatchSet::new(config.event_buffer());
        let watch_events = watches.sender();
        let (updated, _) = broadcast::channel(config.event_buffer());
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();

        let cookie = lifecycle.advise(Arc::new(LifecycleRelay { tx: lifecycle_tx }))?;

        let inner = Arc::new(Inner {
            config,
            projects,
            cache: ContainerCache::new(watches),
            updated,
            disposed: AtomicBool::new(false),
        });

        let handle = tokio::spawn(Self::event_loop(Arc::clone(&inner), watch_rx, lifecycle_rx));

        tracing::info!("Discoverer {} subscribed to solution events", inner.config.executor_uri());

        Ok(Self {
            inner,
            lifecycle,
            cookie: Mutex::new(Some(cookie)),
            listener_handle: Mutex::new(Some(handle)),
            watch_events,
        })
    }

    /// The main loop turning change hints and solution events into invalidations.
    async fn event_loop(
        inner: Arc<Inner>,
        mut watch_rx: broadcast::Receiver<WatchChange>,
        mut lifecycle_rx: mpsc::UnboundedReceiver<SolutionEvent>,
    ) {
        let mut lifecycle_open = true;

        loop {
            let trigger = tokio::select! {
                change = watch_rx.recv() => match change {
                    Ok(change) => Trigger::FileChange(change.kind),
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        tracing::warn!("Discoverer lagged behind by {} file changes", count);
                        Trigger::MissedFileChanges(count)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = lifecycle_rx.recv(), if lifecycle_open => match event {
                    Some(event) => Trigger::Solution(event),
                    None => {
                        lifecycle_open = false;
                        continue;
                    }
                },
            };

            let mut coalesced = 0usize;
            loop {
                match watch_rx.try_recv() {
                    Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => coalesced += 1,
                    Err(_) => break,
                }
            }
            while lifecycle_rx.try_recv().is_ok() {
                coalesced += 1;
            }
            if coalesced > 0 {
                tracing::trace!("Coalesced {} further invalidation triggers", coalesced);
            }

            inner.invalidate(trigger).await;
        }

        tracing::debug!("Discoverer event loop stopped");
    }

    /// The current test containers, recomputed if the cache is unset.
    ///
    /// Never fails; problems reading projects or files yield fewer (or no) containers. After
    /// [`Discoverer::dispose`] this is always empty.
    ///
    /// A recompute walks every project on disk while holding the cache lock. On a multi-thread
    /// runtime it runs in [`tokio::task::block_in_place`] so other tasks move off this worker;
    /// on a current-thread runtime it blocks the runtime until done.
    pub async fn containers(&self) -> ContainerSnapshot {
        if self.is_disposed() {
            return Arc::from(Vec::new());
        }

        let inner = &self.inner;
        inner
            .cache
            .get(|watches| run_blocking(|| inner.collect(watches)))
            .await
    }

    /// Subscribe to `ContainersUpdated` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ContainersUpdated> {
        self.inner.updated.subscribe()
    }

    /// Subscribe to the raw change hints from the watch set.
    pub fn watch_changes(&self) -> broadcast::Receiver<WatchChange> {
        self.watch_events.subscribe()
    }

    /// Invalidate the cache and notify subscribers, as a project-opened event would.
    pub async fn invalidate(&self) {
        self.inner.invalidate(Trigger::Explicit).await;
    }

    pub fn executor_uri(&self) -> &ExecutorUri {
        self.inner.config.executor_uri()
    }

    pub fn config(&self) -> &DiscovererConfig {
        &self.inner.config
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Active (directory, pattern) watches, sorted.
    pub async fn watch_entries(&self) -> Vec<(PathBuf, String)> {
        self.inner.cache.watch_entries().await
    }

    /// Check if the event loop is running.
    pub fn is_listening(&self) -> bool {
        self.listener_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Unsubscribe from solution events, stop the event loop and release every watch.
    ///
    /// Safe to call more than once.
    pub async fn dispose(&self) {
        let first = !self.inner.disposed.swap(true, Ordering::SeqCst);

        self.release_subscription();

        let handle = self
            .listener_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }

        self.inner.cache.clear_watches().await;

        if first {
            tracing::info!("Disposed discoverer {}", self.executor_uri());
        }
    }

    fn release_subscription(&self) {
        let cookie = self
            .cookie
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cookie) = cookie {
            self.lifecycle.unadvise(cookie);
        }
    }

    #[cfg(test)]
    fn inject_watch_change(&self) {
        let _ = self.watch_events.send(WatchChange {
            kind: FileChangeKind::Modify,
        });
    }
}

impl Drop for Discoverer {
    fn drop(&mut self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.release_subscription();

        let handle = self
            .listener_handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

/// Run blocking filesystem work without starving the other tasks on this worker.
fn run_blocking<R>(work: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

/// Builder for [`Discoverer`].
///
/// Without an explicit lifecycle, the discoverer subscribes to a private [`Solution`] that
/// never publishes anything.
pub struct DiscovererBuilder {
    config: DiscovererConfig,
    projects: Arc<dyn ProjectSource>,
    lifecycle: Option<Arc<dyn SolutionLifecycle>>,
}

impl DiscovererBuilder {
    pub fn new(config: DiscovererConfig, projects: Arc<dyn ProjectSource>) -> Self {
        Self {
            config,
            projects,
            lifecycle: None,
        }
    }

    pub fn lifecycle(mut self, lifecycle: Arc<dyn SolutionLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn build(self) -> Result<Discoverer> {
        let lifecycle = self
            .lifecycle
            .unwrap_or_else(|| Arc::new(Solution::new()));
        Discoverer::new(self.config, self.projects, lifecycle)
    }
}
