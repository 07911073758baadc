//! Per-discoverer configuration.
//!
//! A concrete discoverer is described entirely by a [`DiscovererConfig`]: the URI the host uses
//! to route its containers to an execution engine, the file suffix that marks a test container,
//! and the glob patterns watched in every directory that holds one.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Default capacity of the `containersUpdated` and watch broadcast channels.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Largest accepted channel capacity. Broadcast channels preallocate every slot.
pub const MAX_EVENT_BUFFER: usize = 1 << 16;

/// Errors produced when validating a discoverer configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("executor URI `{0}` is not absolute (expected `scheme://...`)")]
    InvalidExecutorUri(String),

    #[error("container file extension must not be empty")]
    EmptyExtension,

    #[error("invalid watched file pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("event buffer size must be greater than zero")]
    ZeroEventBuffer,

    #[error("event buffer size {size} exceeds the maximum of {max}")]
    EventBufferTooLarge { size: usize, max: usize },
}

/// Identity under which the host associates discovered containers with an executor.
///
/// Cheap to clone; containers carry one as a back-reference to their discoverer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorUri(Arc<str>);

impl ExecutorUri {
    /// Parse an absolute URI of the form `scheme://rest`.
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let valid = match uri.split_once("://") {
            Some((scheme, rest)) => {
                !rest.is_empty()
                    && scheme
                        .chars()
                        .next()
                        .is_some_and(|c| c.is_ascii_alphabetic())
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
            }
            None => false,
        };

        if valid {
            Ok(Self(Arc::from(uri)))
        } else {
            Err(ConfigError::InvalidExecutorUri(uri.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutorUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated configuration for one discoverer instance.
#[derive(Debug, Clone)]
pub struct DiscovererConfig {
    executor_uri: ExecutorUri,
    container_file_extension: String,
    watched_file_patterns: Vec<String>,
    event_buffer: usize,
}

impl DiscovererConfig {
    /// Start building a configuration for the given executor.
    pub fn builder(executor_uri: impl Into<String>) -> DiscovererConfigBuilder {
        DiscovererConfigBuilder::new(executor_uri)
    }

    pub fn executor_uri(&self) -> &ExecutorUri {
        &self.executor_uri
    }

    /// Suffix a project item must end with to be treated as a test container.
    pub fn container_file_extension(&self) -> &str {
        &self.container_file_extension
    }

    /// Glob patterns applied to every watched directory, in configured order.
    pub fn watched_file_patterns(&self) -> &[String] {
        &self.watched_file_patterns
    }

    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    /// Whether `path` ends with the configured container extension.
    ///
    /// Exact suffix match. Windows file systems are case-insensitive, so the comparison there
    /// ignores ASCII case.
    pub fn matches_extension(&self, path: &str) -> bool {
        let ext = &self.container_file_extension;
        if cfg!(windows) {
            path.len() >= ext.len()
                && path
                    .get(path.len() - ext.len()..)
                    .is_some_and(|tail| tail.eq_ignore_ascii_case(ext))
        } else {
            path.ends_with(ext.as_str())
        }
    }
}

/// Builder for [`DiscovererConfig`] with sensible defaults.
///
/// When no patterns are given, the container extension itself is watched (`*<extension>`).
pub struct DiscovererConfigBuilder {
    executor_uri: String,
    container_file_extension: String,
    watched_file_patterns: Vec<String>,
    event_buffer: usize,
}

impl DiscovererConfigBuilder {
    pub fn new(executor_uri: impl Into<String>) -> Self {
        Self {
            executor_uri: executor_uri.into(),
            container_file_extension: String::new(),
            watched_file_patterns: Vec::new(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn container_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.container_file_extension = extension.into();
        self
    }

    /// Append a watched glob pattern.
    pub fn watch_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.watched_file_patterns.push(pattern.into());
        self
    }

    pub fn watched_file_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.watched_file_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size;
        self
    }

    pub fn build(self) -> Result<DiscovererConfig, ConfigError> {
        let executor_uri = ExecutorUri::parse(&self.executor_uri)?;

        if self.container_file_extension.is_empty() {
            return Err(ConfigError::EmptyExtension);
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ZeroEventBuffer);
        }
        if self.event_buffer > MAX_EVENT_BUFFER {
            return Err(ConfigError::EventBufferTooLarge {
                size: self.event_buffer,
                max: MAX_EVENT_BUFFER,
            });
        }

        let watched_file_patterns = if self.watched_file_patterns.is_empty() {
            vec![format!("*{}", self.container_file_extension)]
        } else {
            self.watched_file_patterns
        };

        for pattern in &watched_file_patterns {
            if pattern.is_empty() {
                return Err(ConfigError::InvalidPattern {
                    pattern: String::new(),
                    message: "empty pattern".to_string(),
                });
            }
            glob::Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.msg.to_string(),
            })?;
        }

        Ok(DiscovererConfig {
            executor_uri,
            container_file_extension: self.container_file_extension,
            watched_file_patterns,
            event_buffer: self.event_buffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_uri_requires_scheme() {
        assert!(ExecutorUri::parse("executor://KarmaTestExecutor").is_ok());
        assert!(ExecutorUri::parse("executor-x.1://runner/v1").is_ok());
        assert_eq!(
            ExecutorUri::parse("KarmaTestExecutor"),
            Err(ConfigError::InvalidExecutorUri("KarmaTestExecutor".into()))
        );
        assert!(ExecutorUri::parse("://missing").is_err());
        assert!(ExecutorUri::parse("executor://").is_err());
        assert!(ExecutorUri::parse("1abc://x").is_err());
    }

    #[test]
    fn test_builder_defaults_pattern_to_extension() {
        let config = DiscovererConfig::builder("executor://karma")
            .container_file_extension(".spec.js")
            .build()
            .unwrap();

        assert_eq!(config.watched_file_patterns(), ["*.spec.js".to_string()]);
        assert_eq!(config.event_buffer(), DEFAULT_EVENT_BUFFER);
        assert_eq!(config.executor_uri().as_str(), "executor://karma");
    }

    #[test]
    fn test_builder_keeps_pattern_order() {
        let config = DiscovererConfig::builder("executor://karma")
            .container_file_extension("karma.conf.js")
            .watch_pattern("*.js")
            .watch_pattern("*.ts")
            .build()
            .unwrap();

        assert_eq!(config.watched_file_patterns(), ["*.js", "*.ts"]);
    }

    #[test]
    fn test_builder_rejects_invalid_input() {
        let empty_ext = DiscovererConfig::builder("executor://x").build();
        assert_eq!(empty_ext.unwrap_err(), ConfigError::EmptyExtension);

        let bad_pattern = DiscovererConfig::builder("executor://x")
            .container_file_extension(".js")
            .watch_pattern("[")
            .build();
        assert!(matches!(
            bad_pattern.unwrap_err(),
            ConfigError::InvalidPattern { .. }
        ));

        let zero_buffer = DiscovererConfig::builder("executor://x")
            .container_file_extension(".js")
            .event_buffer(0)
            .build();
        assert_eq!(zero_buffer.unwrap_err(), ConfigError::ZeroEventBuffer);
    }

    #[test]
    fn test_builder_bounds_event_buffer() {
        let at_max = DiscovererConfig::builder("executor://x")
            .container_file_extension(".js")
            .event_buffer(MAX_EVENT_BUFFER)
            .build()
            .unwrap();
        assert_eq!(at_max.event_buffer(), MAX_EVENT_BUFFER);

        let huge = DiscovererConfig::builder("executor://x")
            .container_file_extension(".js")
            .event_buffer(usize::MAX)
            .build();
        assert_eq!(
            huge.unwrap_err(),
            ConfigError::EventBufferTooLarge {
                size: usize::MAX,
                max: MAX_EVENT_BUFFER,
            }
        );
    }

    #[test]
    fn test_extension_is_suffix_match() {
        let config = DiscovererConfig::builder("executor://x")
            .container_file_extension(".spec.js")
            .build()
            .unwrap();

        assert!(config.matches_extension("/p/a.spec.js"));
        assert!(!config.matches_extension("/p/a.ts"));
        assert!(!config.matches_extension("/p/b.spec.js.bak"));
        assert!(!config.matches_extension("/p/spec.js"));
    }
}
