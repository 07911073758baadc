//! Host integration.
//!
//! This module provides the contract a host test window relies on, and a consumer that
//! re-queries containers whenever a discoverer reports an update.

pub mod test_window;

pub use test_window::{
    RefreshCallback, TestContainerDiscoverer, TestWindow, TestWindowBuilder, TestWindowState,
};
