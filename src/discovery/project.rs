//! Project sources: where candidate test files come from.
//!
//! The host owns the notion of a project. Discovery only needs to enumerate projects and the
//! item paths of each, so both are traits. Two implementations ship with the crate:
//! [`StaticProjectSource`], an in-memory list the host keeps up to date, and
//! [`DirectoryProjectSource`], which treats each root directory as a project and walks it.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use walkdir::WalkDir;

/// Directories never descended into by [`DirectoryProjectSource`].
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "bin", "obj", "__pycache__"];

/// Errors raised while enumerating projects or their items.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Failed to enumerate projects: {0}")]
    Enumerate(String),

    #[error("Failed to read items of project {project}: {source}")]
    Items {
        project: String,
        source: std::io::Error,
    },
}

/// A project handle exposing its item paths.
pub trait Project: Send {
    /// Display name, used in logs.
    fn name(&self) -> &str;

    /// Absolute paths of every item in the project.
    fn items(&self) -> Result<Vec<PathBuf>, ProjectError>;
}

/// Enumerates the projects currently open in the host.
pub trait ProjectSource: Send + Sync {
    fn projects(&self) -> Result<Vec<Box<dyn Project>>, ProjectError>;
}

/// A project whose item list is known up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticProject {
    name: String,
    items: Vec<PathBuf>,
}

impl StaticProject {
    pub fn new(name: impl Into<String>, items: Vec<PathBuf>) -> Self {
        Self {
            name: name.into(),
            items,
        }
    }
}

impl Project for StaticProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn items(&self) -> Result<Vec<PathBuf>, ProjectError> {
        Ok(self.items.clone())
    }
}

/// In-memory project list, shared with the host that maintains it.
#[derive(Debug, Default)]
pub struct StaticProjectSource {
    projects: RwLock<Vec<StaticProject>>,
}

impl StaticProjectSource {
    pub fn new(projects: Vec<StaticProject>) -> Self {
        Self {
            projects: RwLock::new(projects),
        }
    }

    /// Add or replace a project by name.
    pub fn upsert(&self, project: StaticProject) {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        match projects.iter_mut().find(|p| p.name == project.name) {
            Some(existing) => *existing = project,
            None => projects.push(project),
        }
    }

    /// Remove a project by name. Returns whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        let before = projects.len();
        projects.retain(|p| p.name != name);
        projects.len() != before
    }
}

impl ProjectSource for StaticProjectSource {
    fn projects(&self) -> Result<Vec<Box<dyn Project>>, ProjectError> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(projects
            .iter()
            .cloned()
            .map(|p| Box::new(p) as Box<dyn Project>)
            .collect())
    }
}

/// A directory treated as one project.
#[derive(Debug, Clone)]
pub struct DirectoryProject {
    root: PathBuf,
    name: String,
}

impl DirectoryProject {
    pub fn new(root: PathBuf) -> Self {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.display().to_string());
        Self { root, name }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Project for DirectoryProject {
    fn name(&self) -> &str {
        &self.name
    }

    /// Every file under the root, skipping hidden and build/dependency directories.
    fn items(&self) -> Result<Vec<PathBuf>, ProjectError> {
        if !self.root.is_dir() {
            return Err(ProjectError::Items {
                project: self.name.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} is not a directory", self.root.display()),
                ),
            });
        }

        let mut items = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.') && !SKIP_DIRS.contains(&name.as_ref())
            });

        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => items.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping unreadable entry in {}: {}", self.name, e),
            }
        }

        Ok(items)
    }
}

/// Projects backed by a fixed set of root directories.
#[derive(Debug, Clone, Default)]
pub struct DirectoryProjectSource {
    roots: Vec<PathBuf>,
}

impl DirectoryProjectSource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl ProjectSource for DirectoryProjectSource {
    fn projects(&self) -> Result<Vec<Box<dyn Project>>, ProjectError> {
        Ok(self
            .roots
            .iter()
            .cloned()
            .map(|root| Box::new(DirectoryProject::new(root)) as Box<dyn Project>)
            .collect())
    }
}
