//! Errors surfaced to callers of the application lifecycle.
//!
//! `InvalidArgument` is always raised locally before any store access.
//! `TransitionFailed` and `Store` are the only kinds a caller may retry by
//! re-invoking the action; transitions are idempotent, so a retry after an
//! unobserved success is a no-op.

use crate::application::{ApplicationId, EventId, UserId};
use crate::store::StoreError;
use thiserror::Error;

/// Lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplicationError {
    /// A required id or field was missing
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No signed-in user
    #[error("Not signed in")]
    Unauthenticated,

    /// The application does not exist
    #[error("Application not found: {0}")]
    NotFound(ApplicationId),

    /// The store refused the write on authorization grounds
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Generic write failure
    #[error("Transition failed: {0}")]
    TransitionFailed(String),

    /// The provider already holds an application for this event
    #[error("Provider {provider_id} has already applied to event {event_id}")]
    AlreadyApplied {
        /// Event applied to
        event_id: EventId,
        /// Applying provider
        provider_id: UserId,
    },

    /// Store failure outside a transition (apply path)
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplicationError {
    /// Whether re-invoking the same action may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransitionFailed(_) | Self::Store(_))
    }

    /// Short, stable label used for metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Unauthenticated => "unauthenticated",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::TransitionFailed(_) => "transition_failed",
            Self::AlreadyApplied { .. } => "already_applied",
            Self::Store(_) => "store",
        }
    }
}
