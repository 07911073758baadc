//! Discovered test containers.

use crate::config::ExecutorUri;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One file recognised as holding tests.
///
/// Immutable once built. A rebuild of the container list replaces every container, so a host
/// holding an old one can compare [`TestContainer::modified`] against the new snapshot.
#[derive(Debug, Clone)]
pub struct TestContainer {
    source: PathBuf,
    discoverer: ExecutorUri,
    modified: Option<SystemTime>,
}

impl TestContainer {
    /// Create a container for `source`, reading its modification time from disk.
    pub fn new(discoverer: ExecutorUri, source: PathBuf) -> Self {
        let modified = fs::metadata(&source).and_then(|m| m.modified()).ok();

        Self {
            source,
            discoverer,
            modified,
        }
    }

    /// Absolute path of the test file.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Executor URI of the discoverer that produced this container.
    pub fn discoverer(&self) -> &ExecutorUri {
        &self.discoverer
    }

    /// Modification time observed at discovery, if the file system reported one.
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Directory holding the test file.
    pub fn directory(&self) -> Option<&Path> {
        self.source.parent()
    }
}

impl PartialEq for TestContainer {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.discoverer == other.discoverer
    }
}

impl Eq for TestContainer {}

impl Hash for TestContainer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.discoverer.hash(state);
    }
}
