//! Test container discovery.
//!
//! This module provides:
//! - `watcher`: directory watches with a single coalesced change stream
//! - `cache`: the container list and watch set behind one lock
//! - `discoverer`: the orchestrating discoverer and its invalidation loop
//! - `project`: project sources the discoverer scans
//! - `lifecycle`: solution open/close notifications
//! - `container`: discovered test containers

pub mod cache;
pub mod container;
pub mod discoverer;
pub mod lifecycle;
pub mod project;
pub mod watcher;

pub use cache::{CacheStats, ContainerCache, ContainerSnapshot};
pub use container::TestContainer;
pub use discoverer::{ContainersUpdated, Discoverer, DiscovererBuilder};
pub use lifecycle::{
    AdviseCookie, EventStatus, LifecycleError, Solution, SolutionEvent, SolutionEventListener,
    SolutionLifecycle,
};
pub use project::{
    DirectoryProject, DirectoryProjectSource, Project, ProjectError, ProjectSource,
    StaticProject, StaticProjectSource,
};
pub use watcher::{FileChangeKind, WatchChange, WatchSet, WatcherError};
