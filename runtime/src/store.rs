//! Store runtime for coordinating reducer execution and effect handling.
//!
//! The Store manages:
//! 1. State (behind `RwLock` for concurrent access)
//! 2. Reducer (business logic)
//! 3. Environment (injected dependencies)
//! 4. Effect execution (with feedback loop)
//!
//! Every reduced action is broadcast to observers and bumps a revision counter
//! published through a `watch` channel, so views can await a state predicate
//! instead of polling.

use crate::error::RuntimeError;
use gigmarket_core::{effect::Effect, reducer::Reducer};
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, watch};

const DEFAULT_BROADCAST_CAPACITY: usize = 16;

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`]. Effects produced by actions that the
/// original effects fed back are tracked by the same handle, so
/// [`wait`](Self::wait) returns once the whole cascade has settled.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(ListAction::Refresh).await;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// // The snapshot has been fetched and reduced
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };
        let tracking = EffectTracking {
            counter,
            notifier: Arc::new(tx),
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (_, rx) = watch::channel(());
        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// True once no tracked effect is running
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.effects.load(Ordering::SeqCst) == 0
    }

    /// Wait for all tracked effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                // Every tracker is gone, so nothing can still be running
                break;
            }
        }
    }

    /// Wait for all effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Timeout`] if the timeout expires before all
    /// effects complete.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), RuntimeError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| RuntimeError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: Arc<watch::Sender<()>>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements the effect counter on drop
///
/// Keeps the counter honest even if the effect's task panics.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// The Store - runtime coordinator for a reducer
///
/// # Type Parameters
///
/// - `S`: State type
/// - `A`: Action type
/// - `E`: Environment type
/// - `R`: Reducer implementation
///
/// # Example
///
/// ```ignore
/// let store = Store::new(
///     ApplicationListState::new(event_id),
///     ApplicationListReducer,
///     ListEnvironment::new(application_store),
/// );
///
/// store.send(ListAction::Refresh).await.wait().await;
/// let count = store.state(|s| s.applications.len()).await;
/// ```
pub struct Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    state: Arc<RwLock<S>>,
    reducer: Arc<R>,
    environment: Arc<E>,
    action_broadcast: broadcast::Sender<A>,
    revision: Arc<watch::Sender<u64>>,
}

impl<S, A, E, R> Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
    A: Send + Clone + 'static,
    S: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a new store with initial state, reducer, and environment
    #[must_use]
    pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
        Self::with_broadcast_capacity(initial_state, reducer, environment, DEFAULT_BROADCAST_CAPACITY)
    }

    /// Create a store whose action broadcast buffers `capacity` actions per observer
    #[must_use]
    pub fn with_broadcast_capacity(initial_state: S, reducer: R, environment: E, capacity: usize) -> Self {
        let (action_broadcast, _) = broadcast::channel(capacity.max(1));
        let (revision, _) = watch::channel(0);

        Self {
            state: Arc::new(RwLock::new(initial_state)),
            reducer: Arc::new(reducer),
            environment: Arc::new(environment),
            action_broadcast,
            revision: Arc::new(revision),
        }
    }

    /// Send an action to the store
    ///
    /// 1. Acquires write lock on state
    /// 2. Calls reducer with (state, action, environment)
    /// 3. Broadcasts the action and bumps the state revision
    /// 4. Starts the returned effects; actions they produce are fed back
    ///
    /// `send()` returns after starting effect execution, not after completion.
    /// Concurrent `send()` calls serialize at the reducer.
    ///
    /// # Panics
    ///
    /// If the reducer panics, the panic propagates to the caller.
    #[tracing::instrument(skip(self, action), name = "store_send")]
    pub async fn send(&self, action: A) -> EffectHandle {
        let (handle, tracking) = EffectHandle::new();
        let effects = self.reduce(action).await;

        tracing::trace!("Executing {} effects", effects.len());
        for effect in effects {
            self.execute_effect(effect, tracking.clone());
        }

        handle
    }

    /// Read current state via a closure
    ///
    /// ```ignore
    /// let processing = store.state(|s| s.processing.len()).await;
    /// ```
    pub async fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        let state = self.state.read().await;
        f(&*state)
    }

    /// Subscribe to every action this store reduces
    ///
    /// A receiver that falls behind skips old actions and sees
    /// `RecvError::Lagged`.
    #[must_use]
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.action_broadcast.subscribe()
    }

    /// Watch the state revision, bumped once per reduced action
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Number of actions reduced so far
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Wait until `predicate` holds for the current state
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::Timeout`] if the predicate does not hold within `timeout`
    /// - [`RuntimeError::ChannelClosed`] if the revision channel closes
    pub async fn wait_for<F>(&self, predicate: F, timeout: Duration) -> Result<(), RuntimeError>
    where
        F: Fn(&S) -> bool,
    {
        // Subscribe before the first check so no change is missed
        let mut changes = self.revision.subscribe();

        tokio::time::timeout(timeout, async {
            loop {
                if self.state(&predicate).await {
                    return Ok(());
                }
                if changes.changed().await.is_err() {
                    return Err(RuntimeError::ChannelClosed);
                }
            }
        })
        .await
        .map_err(|_| RuntimeError::Timeout)?
    }

    async fn reduce(&self, action: A) -> SmallVec<[Effect<A>; 4]> {
        let effects = {
            let mut state = self.state.write().await;
            self.reducer
                .reduce(&mut *state, action.clone(), &self.environment)
        };

        let _ = self.action_broadcast.send(action);
        self.revision.send_modify(|revision| *revision += 1);

        effects
    }

    async fn feed_back(&self, action: A, tracking: EffectTracking) {
        let effects = self.reduce(action).await;
        for effect in effects {
            self.execute_effect(effect, tracking.clone());
        }
    }

    /// Execute an effect with tracking
    ///
    /// - `None`: No-op
    /// - `Future`: Runs the computation, feeds back the resulting action if `Some`
    /// - `Delay`: Waits, then feeds back the action
    /// - `Parallel`: Executes effects concurrently
    /// - `Sequential`: Executes effects in order, each cascade settling before the next
    #[allow(clippy::needless_pass_by_value)] // tracking is cloned into spawned tasks
    fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking) {
        match effect {
            Effect::None => {},
            Effect::Future(fut) => {
                tracking.increment();
                let store = self.clone();
                let tracking = tracking.clone();

                tokio::spawn(async move {
                    let _guard = DecrementGuard(tracking.clone());
                    if let Some(action) = fut.await {
                        tracing::trace!("Effect::Future produced an action, feeding back");
                        store.feed_back(action, tracking).await;
                    }
                });
            },
            Effect::Delay { duration, action } => {
                tracking.increment();
                let store = self.clone();
                let tracking = tracking.clone();

                tokio::spawn(async move {
                    let _guard = DecrementGuard(tracking.clone());
                    tokio::time::sleep(duration).await;
                    store.feed_back(*action, tracking).await;
                });
            },
            Effect::Parallel(effects) => {
                for effect in effects {
                    self.execute_effect(effect, tracking.clone());
                }
            },
            Effect::Sequential(effects) => {
                tracking.increment();
                let store = self.clone();
                let tracking = tracking.clone();

                tokio::spawn(async move {
                    let _guard = DecrementGuard(tracking);
                    for effect in effects {
                        let (mut step, step_tracking) = EffectHandle::new();
                        store.execute_effect(effect, step_tracking);
                        step.wait().await;
                    }
                });
            },
        }
    }
}

impl<S, A, E, R> Clone for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            reducer: Arc::clone(&self.reducer),
            environment: Arc::clone(&self.environment),
            action_broadcast: self.action_broadcast.clone(),
            revision: Arc::clone(&self.revision),
        }
    }
}

impl<S, A, E, R> std::fmt::Debug for Store<S, A, E, R>
where
    R: Reducer<State = S, Action = A, Environment = E>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("revision", &*self.revision.borrow())
            .finish_non_exhaustive()
    }
}
