//! # Gigmarket Runtime
//!
//! Runtime for the event-application lifecycle.
//!
//! This crate provides the [`Store`] that coordinates reducer execution and
//! effect handling, and the lifecycle components built on it:
//!
//! - **`StatusTransitionService`**: one verified accept/reject write
//! - **`ConcurrencyGuard`**: at most one in-flight transition per application id
//! - **`ApplicationListReducer`**: reconciles an event's application list with
//!   server snapshots without regressing locally confirmed writes
//! - **`ApplicationTrackerReducer`**: "did I apply, and with what status",
//!   kept live by the change feed
//! - **`MarketplaceClient`**: the surface exposed to the UI layer
//!
//! ## Example
//!
//! ```ignore
//! use gigmarket_runtime::MarketplaceClient;
//!
//! let client = MarketplaceClient::new(store, feed, auth, clock);
//!
//! let view = client.applications_for_event(&event_id);
//! view.refresh().await;
//! let outcome = view.approve(&application_id, &provider_id).await?;
//! ```

/// Client facade exposed to the UI layer
pub mod client;

/// Environment-driven configuration
pub mod config;

/// Per-application-id transition lock
pub mod guard;

/// Prometheus metrics for observability
pub mod metrics;

/// Application list reconciliation
pub mod reconciler;

/// Reducer runtime
pub mod store;

/// Push-subscription handle
pub mod subscription;

/// Per-user application tracking
pub mod tracker;

/// Verified status transitions
pub mod transition;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum RuntimeError {
        /// Timeout waiting for effects or for a state predicate
        #[error("Timed out waiting for the store")]
        Timeout,

        /// The state change channel closed, typically because the store was dropped
        #[error("State change channel closed")]
        ChannelClosed,
    }
}

// Re-export for convenience
pub use client::{ApplicationsSnapshot, EventApplications, MarketplaceClient, MyApplication, MyApplicationStatus};
pub use config::{ClientConfig, ConfigError};
pub use error::RuntimeError;
pub use guard::{ConcurrencyGuard, GuardOutcome, LockToken};
pub use reconciler::{
    ApplicationListReducer, ApplicationListState, ListAction, ListEnvironment, LocalOverride, is_significant_change,
};
pub use store::{EffectHandle, Store};
pub use subscription::Subscription;
pub use tracker::{ApplicationTrackerReducer, TrackerAction, TrackerEnvironment, TrackerPhase, TrackerState};
pub use transition::{StatusTransitionService, TransitionOutcome, UnverifiedReason};
