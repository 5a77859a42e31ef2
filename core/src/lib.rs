//! # Gigmarket Core
//!
//! Core traits and types for the event-application lifecycle.
//!
//! This crate provides the domain model (events, applications, provider
//! summaries), the reducer/effect abstractions the runtime executes, and the
//! contracts of the external collaborators the lifecycle talks to:
//!
//! - **Relational store**: [`store::ApplicationStatusStore`], the authoritative
//!   record of every application and its status
//! - **Change feed**: [`change_feed::ChangeFeed`], a best-effort stream of row
//!   changes pushed by the store
//! - **Authentication context**: [`environment::AuthContext`], consulted
//!   synchronously by every transition and fetch
//!
//! ## Architecture Principles
//!
//! - Reducers are pure: `(State, Action, Environment) → (State, Effects)`
//! - Effects are descriptions; the runtime executes them
//! - Collaborators are injected as `Arc<dyn Trait>`
//!
//! ## Example
//!
//! ```ignore
//! use gigmarket_core::application::{ApplicationStatus, Decision};
//!
//! assert_eq!(Decision::Accept.target_status(), ApplicationStatus::Accepted);
//! assert!(ApplicationStatus::Accepted.is_terminal());
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Applications, their statuses and the provider join
pub mod application;

/// Change-notification channel contract
pub mod change_feed;

/// Error taxonomy surfaced to callers of the lifecycle
pub mod error;

/// Events and the closed-event gating predicate
pub mod event;

/// Relational store contract
pub mod store;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// The list reconciler and the per-user application tracker are both reducers.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for ApplicationListReducer {
    ///     type State = ApplicationListState;
    ///     type Action = ListAction;
    ///     type Environment = ListEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut ApplicationListState,
    ///         action: ListAction,
    ///         env: &ListEnvironment,
    ///     ) -> SmallVec<[Effect<ListAction>; 4]> {
    ///         match action {
    ///             ListAction::TransitionStarted { id } => {
    ///                 state.processing.insert(id);
    ///                 SmallVec::new()
    ///             }
    ///             _ => SmallVec::new(),
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// Updates state in place and returns effect descriptions for the
        /// runtime to execute. Must not perform I/O itself.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and are composable.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are returned from reducers
    /// and executed by the runtime `Store`.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Wrap an async computation that may feed an action back
        #[must_use]
        pub fn future<F>(future: F) -> Effect<Action>
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(future))
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies that are not data stores are abstracted behind
/// traits here and injected by the runtime.
pub mod environment {
    use crate::application::UserId;
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use gigmarket_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// The signed-in user, as reported by the authentication context
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct AuthenticatedUser {
        /// User id (providers and contractors share the id space)
        pub id: UserId,
    }

    impl AuthenticatedUser {
        /// Creates a user handle for the given id
        #[must_use]
        pub fn new(id: impl Into<UserId>) -> Self {
            Self { id: id.into() }
        }
    }

    /// Authentication context
    ///
    /// Consulted synchronously; returns `None` when nobody is signed in.
    pub trait AuthContext: Send + Sync {
        /// The current user, if any
        fn current_user(&self) -> Option<AuthenticatedUser>;
    }
}
