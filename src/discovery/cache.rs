//! Cached container list and the watch set that keeps it honest.
//!
//! [`ContainerCache`] keeps the (containers, watches) pair behind a single async mutex. A
//! recompute holds the lock for its whole duration, so readers wait for it and an invalidation
//! cannot land half-way through. Between an invalidation and the next read the watch set may be
//! stale; the next recompute replaces it along with the list.

use crate::discovery::container::TestContainer;
use crate::discovery::watcher::WatchSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Snapshot of discovered containers. Restartable and never a live view.
pub type ContainerSnapshot = Arc<[TestContainer]>;

/// Counters about cache behaviour, mostly for diagnostics and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of full recomputes.
    pub recomputes: u64,
    /// Reads answered from the cached snapshot.
    pub hits: u64,
    /// Calls to `invalidate`, including ones that found the cache already unset.
    pub invalidations: u64,
    /// Invalidations that actually dropped a populated snapshot.
    pub discarded: u64,
}

struct CacheState {
    containers: Option<ContainerSnapshot>,
    watches: WatchSet,
    stats: CacheStats,
}

/// Lazily populated container list guarded together with its watch set.
pub struct ContainerCache {
    state: Mutex<CacheState>,
}

impl ContainerCache {
    /// Create an unset cache owning `watches`.
    pub fn new(watches: WatchSet) -> Self {
        Self {
            state: Mutex::new(CacheState {
                containers: None,
                watches,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Return the cached snapshot, computing it with `collect` if the cache is unset.
    ///
    /// `collect` receives the watch set and is expected to re-arm it for the containers it
    /// returns. It runs with the lock held.
    pub async fn get<F>(&self, collect: F) -> ContainerSnapshot
    where
        F: FnOnce(&mut WatchSet) -> Vec<TestContainer>,
    {
        let mut state = self.state.lock().await;

        if let Some(containers) = &state.containers {
            let containers = Arc::clone(containers);
            state.stats.hits += 1;
            return containers;
        }

        let containers: ContainerSnapshot = collect(&mut state.watches).into();
        state.stats.recomputes += 1;
        state.containers = Some(Arc::clone(&containers));
        containers
    }

    /// Mark the cache as needing a recompute. Idempotent; never recomputes itself.
    ///
    /// Returns `true` if a populated snapshot was dropped.
    pub async fn invalidate(&self) -> bool {
        let mut state = self.state.lock().await;
        state.stats.invalidations += 1;

        let discarded = state.containers.take().is_some();
        if discarded {
            state.stats.discarded += 1;
        }
        discarded
    }

    /// Invalidate and release every watch.
    pub async fn clear_watches(&self) {
        let mut state = self.state.lock().await;
        state.containers = None;
        state.watches.clear();
    }

    pub async fn is_populated(&self) -> bool {
        self.state.lock().await.containers.is_some()
    }

    /// Active (directory, pattern) watches, sorted.
    pub async fn watch_entries(&self) -> Vec<(std::path::PathBuf, String)> {
        self.state.lock().await.watches.entries()
    }

    pub async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorUri;
    use std::path::PathBuf;

    fn container(path: &str) -> TestContainer {
        let uri = ExecutorUri::parse("executor://test").unwrap();
        TestContainer::new(uri, PathBuf::from(path))
    }

    fn cache() -> ContainerCache {
        let (watches, _rx) = WatchSet::new(16);
        ContainerCache::new(watches)
    }

    #[tokio::test]
    async fn test_get_computes_once() {
        let cache = cache();
        let mut calls = 0;

        let first = cache
            .get(|_| {
                calls += 1;
                vec![container("/p/a.spec.js")]
            })
            .await;
        let second = cache
            .get(|_| {
                calls += 1;
                Vec::new()
            })
            .await;

        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 1);
        assert_eq!(cache.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_invalidate_defers_recompute() {
        let cache = cache();
        cache.get(|_| vec![container("/p/a.spec.js")]).await;

        assert!(cache.invalidate().await);
        assert!(!cache.is_populated().await);
        assert_eq!(cache.stats().await.recomputes, 1);

        let next = cache.get(|_| Vec::new()).await;
        assert!(next.is_empty());
        assert_eq!(cache.stats().await.recomputes, 2);
    }

    #[tokio::test]
    async fn test_repeated_invalidation_collapses() {
        let cache = cache();
        cache.get(|_| vec![container("/p/a.spec.js")]).await;

        let dropped: Vec<bool> = {
            let mut out = Vec::new();
            for _ in 0..5 {
                out.push(cache.invalidate().await);
            }
            out
        };
        assert_eq!(dropped, [true, false, false, false, false]);

        let mut calls = 0;
        cache
            .get(|_| {
                calls += 1;
                Vec::new()
            })
            .await;
        cache
            .get(|_| {
                calls += 1;
                Vec::new()
            })
            .await;
        assert_eq!(calls, 1);

        let stats = cache.stats().await;
        assert_eq!(stats.invalidations, 5);
        assert_eq!(stats.discarded, 1);
    }

    #[tokio::test]
    async fn test_empty_result_is_cached() {
        let cache = cache();
        cache.get(|_| Vec::new()).await;

        assert!(cache.is_populated().await);
    }

    #[tokio::test]
    async fn test_clear_watches_unsets_cache() {
        let temp = tempfile::tempdir().unwrap();
        let cache = cache();
        cache
            .get(|watches| {
                watches.add_watch(temp.path(), "*.js");
                vec![container("/p/a.spec.js")]
            })
            .await;
        assert_eq!(cache.watch_entries().await.len(), 1);

        cache.clear_watches().await;

        assert!(cache.watch_entries().await.is_empty());
        assert!(!cache.is_populated().await);
    }
}
