//! Crate-level errors.
//!
//! Only failures that stop a discoverer from working at all surface here. Per-file and
//! per-project problems during discovery are logged and skipped instead.

use crate::config::ConfigError;
use crate::discovery::lifecycle::LifecycleError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot subscribe to solution events: {0}")]
    Lifecycle(#[from] LifecycleError),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
