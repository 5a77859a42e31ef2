//! Per-application-id transition lock.
//!
//! A [`ConcurrencyGuard`] owns the set of application ids with a transition in
//! flight. Each view or client owns its own guard, so independent views never
//! block each other. A second attempt on a locked id is skipped, not queued:
//! callers get [`GuardOutcome::AlreadyInProgress`] and the wrapped work never
//! runs.
//!
//! The lock is held by a [`LockToken`] and released when the token drops, on
//! every exit path including errors and panics in the wrapped work.

use crate::metrics::GuardMetrics;
use gigmarket_core::application::ApplicationId;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Result of running work under the guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome<T> {
    /// The lock was free; the work ran and produced `T`
    Ran(T),
    /// Another attempt on the same id was in flight; the work did not run
    AlreadyInProgress,
}

impl<T> GuardOutcome<T> {
    /// True if the work was skipped
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::AlreadyInProgress)
    }

    /// The work's output, if it ran
    #[must_use]
    pub fn ran(self) -> Option<T> {
        match self {
            Self::Ran(value) => Some(value),
            Self::AlreadyInProgress => None,
        }
    }

    /// Map the output of work that ran
    #[must_use]
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> GuardOutcome<U> {
        match self {
            Self::Ran(value) => GuardOutcome::Ran(f(value)),
            Self::AlreadyInProgress => GuardOutcome::AlreadyInProgress,
        }
    }
}

impl<T, E> GuardOutcome<Result<T, E>> {
    /// Lift the wrapped work's error out of the outcome
    ///
    /// # Errors
    ///
    /// Returns the error produced by the wrapped work.
    pub fn transpose(self) -> Result<GuardOutcome<T>, E> {
        match self {
            Self::Ran(result) => result.map(GuardOutcome::Ran),
            Self::AlreadyInProgress => Ok(GuardOutcome::AlreadyInProgress),
        }
    }
}

type InFlight = Arc<Mutex<HashSet<ApplicationId>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<ApplicationId>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Instance-owned set of in-flight application ids.
///
/// Clones share the same set.
///
/// # Example
///
/// ```
/// use gigmarket_runtime::ConcurrencyGuard;
/// use gigmarket_core::application::ApplicationId;
///
/// let guard = ConcurrencyGuard::new();
/// let id = ApplicationId::new("app-1");
///
/// let token = guard.try_acquire(&id).unwrap();
/// assert!(guard.is_locked(&id));
/// assert!(guard.try_acquire(&id).is_none());
///
/// drop(token);
/// assert!(!guard.is_locked(&id));
/// ```
#[derive(Clone, Debug, Default)]
pub struct ConcurrencyGuard {
    in_flight: InFlight,
}

impl ConcurrencyGuard {
    /// Create a guard with nothing locked
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a transition on `id` is in flight
    #[must_use]
    pub fn is_locked(&self, id: &ApplicationId) -> bool {
        lock(&self.in_flight).contains(id)
    }

    /// Ids currently locked
    #[must_use]
    pub fn locked_ids(&self) -> HashSet<ApplicationId> {
        lock(&self.in_flight).clone()
    }

    /// Lock `id` unless it is already locked
    #[must_use]
    pub fn try_acquire(&self, id: &ApplicationId) -> Option<LockToken> {
        if !lock(&self.in_flight).insert(id.clone()) {
            return None;
        }
        Some(LockToken {
            id: id.clone(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Run `work` while holding the lock for `id`, or skip it if the id is locked
    pub async fn with_lock<F, Fut, T>(&self, id: &ApplicationId, work: F) -> GuardOutcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(_token) = self.try_acquire(id) else {
            tracing::debug!(application_id = %id, "Transition already in progress, skipping");
            GuardMetrics::record_skipped();
            return GuardOutcome::AlreadyInProgress;
        };

        GuardOutcome::Ran(work().await)
    }
}

/// Proof that an application id is locked; dropping it releases the lock
#[derive(Debug)]
pub struct LockToken {
    id: ApplicationId,
    in_flight: InFlight,
}

impl LockToken {
    /// The locked id
    #[must_use]
    pub const fn id(&self) -> &ApplicationId {
        &self.id
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn id(value: &str) -> ApplicationId {
        ApplicationId::new(value)
    }

    #[tokio::test]
    async fn second_attempt_is_skipped_while_first_runs() {
        let guard = ConcurrencyGuard::new();
        let (release, released) = oneshot::channel::<()>();

        let first = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .with_lock(&id("a"), || async move {
                        released.await.ok();
                        "first"
                    })
                    .await
            })
        };

        // Let the first attempt take the lock
        while !guard.is_locked(&id("a")) {
            tokio::task::yield_now().await;
        }

        let ran = AtomicBool::new(false);
        let ran_ref = &ran;
        let second = guard
            .with_lock(&id("a"), move || async move {
                ran_ref.store(true, Ordering::SeqCst);
            })
            .await;
        assert_eq!(second, GuardOutcome::AlreadyInProgress);
        assert!(!ran.load(Ordering::SeqCst));

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap(), GuardOutcome::Ran("first"));
        assert!(!guard.is_locked(&id("a")));
    }

    #[tokio::test]
    async fn different_ids_do_not_block_each_other() {
        let guard = ConcurrencyGuard::new();
        let _a = guard.try_acquire(&id("a")).unwrap();

        let outcome = guard.with_lock(&id("b"), || async { 2 }).await;
        assert_eq!(outcome, GuardOutcome::Ran(2));
    }

    #[tokio::test]
    async fn separate_guards_do_not_cross_block() {
        let first_view = ConcurrencyGuard::new();
        let second_view = ConcurrencyGuard::new();
        let _held = first_view.try_acquire(&id("a")).unwrap();

        assert!(!second_view.is_locked(&id("a")));
        assert!(second_view.try_acquire(&id("a")).is_some());
    }

    #[tokio::test]
    async fn lock_is_released_when_work_fails() {
        let guard = ConcurrencyGuard::new();

        let outcome: GuardOutcome<Result<(), String>> = guard
            .with_lock(&id("a"), || async { Err("boom".to_string()) })
            .await;

        assert_eq!(outcome.transpose(), Err("boom".to_string()));
        assert!(!guard.is_locked(&id("a")));
    }

    #[tokio::test]
    async fn lock_is_released_when_work_panics() {
        let guard = ConcurrencyGuard::new();

        let task = {
            let guard = guard.clone();
            tokio::spawn(async move {
                guard
                    .with_lock(&id("a"), || async {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        panic!("transition blew up");
                    })
                    .await
            })
        };

        assert!(task.await.is_err());
        assert!(!guard.is_locked(&id("a")));
    }

    #[test]
    fn transpose_keeps_skips() {
        let skipped: GuardOutcome<Result<u8, String>> = GuardOutcome::AlreadyInProgress;
        assert_eq!(skipped.transpose(), Ok(GuardOutcome::AlreadyInProgress));
        assert_eq!(GuardOutcome::Ran(3).map(|n| n * 2).ran(), Some(6));
    }
}
