//! Test Container Discovery
//!
//! This crate finds test containers (files holding tests, recognised by extension) across the
//! projects of a host IDE, caches the list, and watches the directories they live in so the host
//! can be told when to run discovery again.
//!
//! ## Flow
//!
//! ```text
//! host reads containers
//!        ↓
//! ContainerCache::get [single lock]
//!        ↓ (miss)
//! ProjectSource → filter by extension → TestContainer list
//!        ↓
//! WatchSet re-armed for the distinct directories × watched patterns
//!
//! file change / project opened / solution opened
//!        ↓
//! Discoverer event loop (coalesces queued triggers)
//!        ↓
//! ContainerCache::invalidate → broadcast ContainersUpdated
//!        ↓
//! host re-reads containers
//! ```
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use test_container_discovery::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DiscovererConfig::builder("executor://KarmaTestExecutor")
//!         .container_file_extension(".spec.js")
//!         .watch_pattern("*.js")
//!         .build()?;
//!
//!     let projects = Arc::new(DirectoryProjectSource::new(vec![PathBuf::from("/repo/web")]));
//!     let solution = Arc::new(Solution::new());
//!     let discoverer = DiscovererBuilder::new(config, projects)
//!         .lifecycle(solution.clone())
//!         .build()?;
//!
//!     let mut updates = discoverer.subscribe();
//!     for container in discoverer.containers().await.iter() {
//!         println!("{}", container.source().display());
//!     }
//!
//!     updates.recv().await?;
//!     println!("{} containers now", discoverer.containers().await.len());
//!
//!     discoverer.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Structure
//!
//! - [`discovery`]: discovery, caching and invalidation
//!   - [`discovery::watcher`]: directory watches with a coalesced change stream
//!   - [`discovery::cache`]: container list and watch set behind one lock
//!   - [`discovery::discoverer`]: the discoverer and its event loop
//!   - [`discovery::project`]: project sources
//!   - [`discovery::lifecycle`]: solution notifications
//! - [`host`]: host test-window contract and consumer
//! - [`config`]: per-discoverer configuration

#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod host;

pub use error::{DiscoveryError, Result};

/// Re-exports for convenience.
pub mod prelude {
    pub use crate::config::{ConfigError, DiscovererConfig, DiscovererConfigBuilder, ExecutorUri};
    pub use crate::discovery::{
        ContainerSnapshot, ContainersUpdated, DirectoryProjectSource, Discoverer,
        DiscovererBuilder, EventStatus, Project, ProjectSource, Solution, SolutionEvent,
        SolutionLifecycle, StaticProject, StaticProjectSource, TestContainer,
    };
    pub use crate::error::{DiscoveryError, Result};
    pub use crate::host::{TestContainerDiscoverer, TestWindow, TestWindowBuilder};
}
