//! # Gigmarket Testing
//!
//! Testing utilities for the application lifecycle.
//!
//! This crate provides:
//! - In-memory implementations of the store and change feed, with fault injection
//! - Deterministic clock and authentication context
//! - A Given-When-Then harness for reducers
//! - Fixture builders for rows, events and provider joins
//!
//! ## Example
//!
//! ```ignore
//! use gigmarket_testing::{InMemoryApplicationStore, StaticAuth, fixtures};
//!
//! #[tokio::test]
//! async fn accepts_pending_application() {
//!     let store = InMemoryApplicationStore::new();
//!     store.seed_row(fixtures::pending_row("app-1", "event-1", "provider-1"));
//!     let auth = StaticAuth::signed_in("owner-1");
//!     // build a transition service over `store` and `auth`...
//! }
//! ```

use chrono::{DateTime, Utc};
use gigmarket_core::application::UserId;
use gigmarket_core::environment::{AuthContext, AuthenticatedUser, Clock};
use std::sync::{Arc, PoisonError, RwLock};

/// In-memory change feed
pub mod feed_mocks;

/// Fixture builders
pub mod fixtures;


/// In-memory application store
pub mod store_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{
        Arc, AuthContext, AuthenticatedUser, Clock, DateTime, PoisonError, RwLock, UserId, Utc,
    };

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use gigmarket_testing::mocks::FixedClock;
    /// use gigmarket_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Authentication context whose user can be swapped mid-test
    ///
    /// # Example
    ///
    /// ```
    /// use gigmarket_testing::mocks::StaticAuth;
    /// use gigmarket_core::environment::AuthContext;
    ///
    /// let auth = StaticAuth::signed_in("owner-1");
    /// assert!(auth.current_user().is_some());
    /// auth.sign_out();
    /// assert!(auth.current_user().is_none());
    /// ```
    #[derive(Debug, Clone, Default)]
    pub struct StaticAuth {
        user: Arc<RwLock<Option<UserId>>>,
    }

    impl StaticAuth {
        /// Nobody signed in
        #[must_use]
        pub fn anonymous() -> Self {
            Self::default()
        }

        /// Signed in as `id`
        #[must_use]
        pub fn signed_in(id: impl Into<UserId>) -> Self {
            let auth = Self::default();
            auth.sign_in(id);
            auth
        }

        /// Switch the signed-in user
        pub fn sign_in(&self, id: impl Into<UserId>) {
            *self.user.write().unwrap_or_else(PoisonError::into_inner) = Some(id.into());
        }

        /// Sign the current user out
        pub fn sign_out(&self) {
            *self.user.write().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }

    impl AuthContext for StaticAuth {
        fn current_user(&self) -> Option<AuthenticatedUser> {
            self.user
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
                .map(|id| AuthenticatedUser { id })
        }
    }
}

/// Install a test log subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use feed_mocks::InMemoryChangeFeed;
pub use mocks::{FixedClock, StaticAuth, test_clock};
pub use reducer_test::{ReducerTest, assertions, run_effects};
pub use store_mocks::InMemoryApplicationStore;
