//! Solution lifecycle notifications.
//!
//! The host tells interested listeners when projects and solutions are opened, closed or
//! unloaded. Listeners are advised through [`SolutionLifecycle`] and receive every
//! [`SolutionEvent`], returning an [`EventStatus`] for each.
//!
//! [`Solution`] is an in-memory implementation for hosts without their own event source, and for
//! tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// A discrete notification from the host's solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolutionEvent {
    AfterOpenProject { added: bool },
    AfterOpenSolution { new_solution: bool },
    AfterLoadProject,
    AfterCloseSolution,
    BeforeCloseProject { removed: bool },
    BeforeCloseSolution,
    BeforeUnloadProject,
    QueryCloseProject { removing: bool },
    QueryCloseSolution,
    QueryUnloadProject,
}

impl SolutionEvent {
    /// Whether this event changes the project topology enough to rediscover containers.
    pub fn invalidates_containers(&self) -> bool {
        matches!(
            self,
            SolutionEvent::AfterOpenProject { .. } | SolutionEvent::AfterOpenSolution { .. }
        )
    }
}

/// Status returned by a listener for each notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Ok,
    /// The listener could not act on the event (e.g. it has already shut down).
    Failed,
}

/// Receives solution notifications.
pub trait SolutionEventListener: Send + Sync {
    fn on_event(&self, event: &SolutionEvent) -> EventStatus;
}

/// Token identifying one advised listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdviseCookie(u64);

/// Host failures while subscribing to solution events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Solution service is unavailable")]
    Unavailable,

    #[error("Failed to advise solution events: {0}")]
    Advise(String),
}

/// Source of solution notifications.
pub trait SolutionLifecycle: Send + Sync {
    fn advise(
        &self,
        listener: Arc<dyn SolutionEventListener>,
    ) -> Result<AdviseCookie, LifecycleError>;

    /// Stop delivering to the listener behind `cookie`. Returns whether it was advised.
    fn unadvise(&self, cookie: AdviseCookie) -> bool;
}

/// In-memory solution that fans events out to advised listeners.
pub struct Solution {
    listeners: RwLock<BTreeMap<AdviseCookie, Arc<dyn SolutionEventListener>>>,
    next_cookie: AtomicU64,
    available: bool,
}

impl Default for Solution {
    fn default() -> Self {
        Self::new()
    }
}

impl Solution {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(BTreeMap::new()),
            next_cookie: AtomicU64::new(1),
            available: true,
        }
    }

    /// A solution whose `advise` always fails, standing in for a missing host service.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Deliver `event` to every advised listener, in advise order.
    ///
    /// Listeners are invoked outside the registry lock, so they may advise or unadvise.
    pub fn publish(&self, event: SolutionEvent) -> Vec<EventStatus> {
        let listeners: Vec<Arc<dyn SolutionEventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        tracing::debug!("Publishing {:?} to {} listeners", event, listeners.len());
        listeners.iter().map(|l| l.on_event(&event)).collect()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl SolutionLifecycle for Solution {
    fn advise(
        &self,
        listener: Arc<dyn SolutionEventListener>,
    ) -> Result<AdviseCookie, LifecycleError> {
        if !self.available {
            return Err(LifecycleError::Unavailable);
        }

        let cookie = AdviseCookie(self.next_cookie.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cookie, listener);
        Ok(cookie)
    }

    fn unadvise(&self, cookie: AdviseCookie) -> bool {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&cookie)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<SolutionEvent>>,
    }

    impl SolutionEventListener for Recorder {
        fn on_event(&self, event: &SolutionEvent) -> EventStatus {
            self.seen.lock().unwrap().push(*event);
            EventStatus::Ok
        }
    }

    #[test]
    fn test_only_open_events_invalidate() {
        assert!(SolutionEvent::AfterOpenProject { added: true }.invalidates_containers());
        assert!(SolutionEvent::AfterOpenSolution { new_solution: false }.invalidates_containers());

        for event in [
            SolutionEvent::AfterLoadProject,
            SolutionEvent::AfterCloseSolution,
            SolutionEvent::BeforeCloseProject { removed: true },
            SolutionEvent::BeforeCloseSolution,
            SolutionEvent::BeforeUnloadProject,
            SolutionEvent::QueryCloseProject { removing: false },
            SolutionEvent::QueryCloseSolution,
            SolutionEvent::QueryUnloadProject,
        ] {
            assert!(!event.invalidates_containers(), "{:?}", event);
        }
    }

    #[test]
    fn test_publish_reaches_advised_listeners() {
        let solution = Solution::new();
        let recorder = Arc::new(Recorder::default());
        let cookie = solution.advise(recorder.clone()).unwrap();

        let statuses = solution.publish(SolutionEvent::AfterCloseSolution);
        assert_eq!(statuses, [EventStatus::Ok]);

        assert!(solution.unadvise(cookie));
        assert!(!solution.unadvise(cookie));
        assert!(solution.publish(SolutionEvent::QueryCloseSolution).is_empty());

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            [SolutionEvent::AfterCloseSolution]
        );
    }

    #[test]
    fn test_unavailable_solution_rejects_advise() {
        let solution = Solution::unavailable();
        let result = solution.advise(Arc::new(Recorder::default()));

        assert_eq!(result.unwrap_err(), LifecycleError::Unavailable);
        assert_eq!(solution.listener_count(), 0);
    }
}
