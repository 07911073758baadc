//! Host-side consumer of a discoverer.
//!
//! [`TestWindow`] plays the part of the IDE's test window: it listens for `ContainersUpdated`,
//! re-queries the container list and hands it to the host through a callback.

use crate::config::ExecutorUri;
use crate::discovery::{ContainerSnapshot, ContainersUpdated, Discoverer, TestContainer};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// What the host needs from a discoverer.
#[async_trait]
pub trait TestContainerDiscoverer: Send + Sync {
    /// URI of the executor that runs this discoverer's containers.
    fn executor_uri(&self) -> &ExecutorUri;

    async fn test_containers(&self) -> ContainerSnapshot;

    fn subscribe(&self) -> broadcast::Receiver<ContainersUpdated>;
}

#[async_trait]
impl TestContainerDiscoverer for Discoverer {
    fn executor_uri(&self) -> &ExecutorUri {
        Discoverer::executor_uri(self)
    }

    async fn test_containers(&self) -> ContainerSnapshot {
        self.containers().await
    }

    fn subscribe(&self) -> broadcast::Receiver<ContainersUpdated> {
        Discoverer::subscribe(self)
    }
}

/// Callback invoked with each freshly queried container list.
pub type RefreshCallback = Box<dyn Fn(&[TestContainer]) + Send + Sync>;

/// Last container list seen by the window.
#[derive(Debug, Clone)]
pub struct TestWindowState {
    pub containers: ContainerSnapshot,
    /// Number of times the list was re-queried.
    pub refreshes: u64,
}

impl Default for TestWindowState {
    fn default() -> Self {
        Self {
            containers: Arc::from(Vec::new()),
            refreshes: 0,
        }
    }
}

/// Listens to one discoverer and keeps its latest container list.
pub struct TestWindow {
    discoverer: Arc<dyn TestContainerDiscoverer>,
    state: Arc<RwLock<TestWindowState>>,
    on_refresh: Option<Arc<RefreshCallback>>,
    listener_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestWindow {
    pub fn new(discoverer: Arc<dyn TestContainerDiscoverer>) -> Self {
        Self {
            discoverer,
            state: Arc::new(RwLock::new(TestWindowState::default())),
            on_refresh: None,
            listener_handle: None,
        }
    }

    /// Query the containers once, then re-query after every update in a background task.
    pub fn start(&mut self) {
        if self.is_listening() {
            return;
        }

        // Subscribe before the first query so no update slips between the two.
        let rx = self.discoverer.subscribe();
        let discoverer = Arc::clone(&self.discoverer);
        let state = Arc::clone(&self.state);
        let on_refresh = self.on_refresh.clone();

        self.listener_handle = Some(tokio::spawn(async move {
            Self::refresh(discoverer.as_ref(), &state, on_refresh.as_deref()).await;
            Self::listener_loop(discoverer, state, on_refresh, rx).await;
        }));
    }

    async fn listener_loop(
        discoverer: Arc<dyn TestContainerDiscoverer>,
        state: Arc<RwLock<TestWindowState>>,
        on_refresh: Option<Arc<RefreshCallback>>,
        mut rx: broadcast::Receiver<ContainersUpdated>,
    ) {
        loop {
            match rx.recv().await {
                Ok(ContainersUpdated) => {}
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    tracing::debug!("Test window skipped {} container updates", count);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("ContainersUpdated channel closed, stopping test window");
                    break;
                }
            }

            // One re-query answers every update queued so far.
            while rx.try_recv().is_ok() {}

            Self::refresh(discoverer.as_ref(), &state, on_refresh.as_deref()).await;
        }
    }

    async fn refresh(
        discoverer: &dyn TestContainerDiscoverer,
        state: &RwLock<TestWindowState>,
        on_refresh: Option<&RefreshCallback>,
    ) {
        let containers = discoverer.test_containers().await;
        tracing::debug!(
            "Test window for {} now shows {} containers",
            discoverer.executor_uri(),
            containers.len()
        );

        {
            let mut state = state.write().await;
            state.containers = Arc::clone(&containers);
            state.refreshes += 1;
        }

        if let Some(cb) = on_refresh {
            cb(&containers[..]);
        }
    }

    /// The containers from the most recent refresh.
    pub async fn containers(&self) -> ContainerSnapshot {
        Arc::clone(&self.state.read().await.containers)
    }

    pub async fn refreshes(&self) -> u64 {
        self.state.read().await.refreshes
    }

    /// Stop the listener task.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Check if the listener is running.
    pub fn is_listening(&self) -> bool {
        self.listener_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for TestWindow {
    fn drop(&mut self) {
        if let Some(handle) = self.listener_handle.take() {
            handle.abort();
        }
    }
}

/// Builder for TestWindow.
pub struct TestWindowBuilder {
    discoverer: Arc<dyn TestContainerDiscoverer>,
    on_refresh: Option<RefreshCallback>,
}

impl TestWindowBuilder {
    pub fn new(discoverer: Arc<dyn TestContainerDiscoverer>) -> Self {
        Self {
            discoverer,
            on_refresh: None,
        }
    }

    /// Set the callback for refreshed container lists.
    pub fn on_refresh(mut self, cb: RefreshCallback) -> Self {
        self.on_refresh = Some(cb);
        self
    }

    pub fn build(self) -> TestWindow {
        let mut window = TestWindow::new(self.discoverer);
        window.on_refresh = self.on_refresh.map(Arc::new);
        window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscovererConfig;
    use crate::discovery::{Solution, SolutionEvent, StaticProject, StaticProjectSource};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeDiscoverer {
        uri: ExecutorUri,
        queries: AtomicUsize,
        updated: broadcast::Sender<ContainersUpdated>,
    }

    impl FakeDiscoverer {
        fn new() -> Self {
            Self {
                uri: ExecutorUri::parse("executor://fake").unwrap(),
                queries: AtomicUsize::new(0),
                updated: broadcast::channel(16).0,
            }
        }
    }

    #[async_trait]
    impl TestContainerDiscoverer for FakeDiscoverer {
        fn executor_uri(&self) -> &ExecutorUri {
            &self.uri
        }

        async fn test_containers(&self) -> ContainerSnapshot {
            let n = self.queries.fetch_add(1, Ordering::SeqCst);
            let containers: Vec<TestContainer> = (0..=n)
                .map(|i| {
                    TestContainer::new(self.uri.clone(), PathBuf::from(format!("/t/{i}.spec.js")))
                })
                .collect();
            containers.into()
        }

        fn subscribe(&self) -> broadcast::Receiver<ContainersUpdated> {
            self.updated.subscribe()
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_window_queries_on_start() {
        let fake = Arc::new(FakeDiscoverer::new());
        let mut window = TestWindow::new(fake.clone());
        assert!(!window.is_listening());

        window.start();
        settle().await;

        assert!(window.is_listening());
        assert_eq!(window.refreshes().await, 1);
        assert_eq!(window.containers().await.len(), 1);

        window.stop().await;
        assert!(!window.is_listening());
    }

    #[tokio::test]
    async fn test_window_requeries_after_update() {
        let fake = Arc::new(FakeDiscoverer::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        let mut window = TestWindowBuilder::new(fake.clone())
            .on_refresh(Box::new(move |containers: &[TestContainer]| {
                seen_cb.store(containers.len(), Ordering::SeqCst);
            }))
            .build();

        window.start();
        settle().await;
        fake.updated.send(ContainersUpdated).unwrap();
        settle().await;

        assert_eq!(window.refreshes().await, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        window.stop().await;
    }

    #[tokio::test]
    async fn test_window_collapses_queued_updates() {
        let fake = Arc::new(FakeDiscoverer::new());
        let mut window = TestWindow::new(fake.clone());

        window.start();
        settle().await;
        for _ in 0..5 {
            fake.updated.send(ContainersUpdated).unwrap();
        }
        settle().await;

        assert_eq!(window.refreshes().await, 2);
        window.stop().await;
    }

    #[tokio::test]
    async fn test_window_follows_real_discoverer() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("a.spec.js");
        std::fs::write(&file, "it()").unwrap();

        let source = Arc::new(StaticProjectSource::default());
        let solution = Arc::new(Solution::new());
        let config = DiscovererConfig::builder("executor://karma")
            .container_file_extension(".spec.js")
            .build()
            .unwrap();
        let discoverer =
            Arc::new(Discoverer::new(config, source.clone(), solution.clone()).unwrap());

        let mut window = TestWindow::new(discoverer.clone());
        window.start();
        settle().await;
        assert!(window.containers().await.is_empty());

        source.upsert(StaticProject::new("web", vec![file.clone()]));
        solution.publish(SolutionEvent::AfterOpenProject { added: true });
        settle().await;

        let containers = window.containers().await;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].source(), file);

        window.stop().await;
        discoverer.dispose().await;
    }

    #[tokio::test]
    async fn test_dropped_window_releases_discoverer() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("a.spec.js");
        std::fs::write(&file, "it()").unwrap();

        let source = Arc::new(StaticProjectSource::new(vec![StaticProject::new(
            "web",
            vec![file],
        )]));
        let solution = Arc::new(Solution::new());
        let config = DiscovererConfig::builder("executor://karma")
            .container_file_extension(".spec.js")
            .build()
            .unwrap();
        let discoverer = Arc::new(Discoverer::new(config, source, solution.clone()).unwrap());
        let weak = Arc::downgrade(&discoverer);

        let mut window = TestWindow::new(discoverer.clone());
        window.start();
        settle().await;
        assert_eq!(window.containers().await.len(), 1);
        assert_eq!(discoverer.watch_entries().await.len(), 1);

        drop(window);
        drop(discoverer);
        settle().await;

        assert!(weak.upgrade().is_none(), "discoverer outlived its last window");
        assert_eq!(solution.listener_count(), 0);
    }
}
