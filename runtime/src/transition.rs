//! Verified status transitions.
//!
//! [`StatusTransitionService::transition`] performs exactly one accept/reject
//! write and then re-reads the row to confirm it landed:
//!
//! 1. An authenticated caller is required.
//! 2. The current row is read; a missing row is `NotFound`.
//! 3. A row already at the target status is returned unchanged, with no write.
//! 4. One update is issued, conditional on the id and the status read in step 2.
//! 5. Update errors map to `PermissionDenied` or `TransitionFailed`.
//! 6. The row is re-read. A failed or empty re-read, or a status other than the
//!    target, yields [`TransitionOutcome::Unverified`] rather than an error.
//!
//! Nothing is retried automatically. Whether the parent event is closed is not
//! consulted here; that gating is advisory and lives with the views.

use crate::metrics::TransitionMetrics;
use gigmarket_core::application::{ApplicationId, ApplicationStatus, Decision, EventApplication};
use gigmarket_core::environment::AuthContext;
use gigmarket_core::error::ApplicationError;
use gigmarket_core::store::{ApplicationFilter, ApplicationStatusStore, Select, StatusPatch, StoreError};
use std::sync::Arc;
use std::time::Instant;

/// Why a write could not be confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnverifiedReason {
    /// The verification read failed
    ReadFailed(StoreError),
    /// The verification read found no row
    RowMissing,
    /// The row was read back with a status other than the target
    StatusMismatch,
}

impl std::fmt::Display for UnverifiedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(error) => write!(f, "verification read failed: {error}"),
            Self::RowMissing => write!(f, "row missing on verification read"),
            Self::StatusMismatch => write!(f, "status unchanged after write"),
        }
    }
}

/// Result of a transition that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The row already had the target status; no write was issued
    Unchanged(EventApplication),

    /// The write was read back with the target status
    Verified(EventApplication),

    /// The store accepted the write but it could not be confirmed.
    ///
    /// Treat as optimistically applied and let the next reconciliation pass
    /// correct it.
    Unverified {
        /// The pre-write record carrying the requested status
        record: EventApplication,
        /// Status read before the write
        previous_status: ApplicationStatus,
        /// Status read back after the write, when the re-read returned a row
        observed_status: Option<ApplicationStatus>,
        /// Why confirmation failed
        reason: UnverifiedReason,
    },
}

impl TransitionOutcome {
    /// The record to present to the caller
    #[must_use]
    pub const fn record(&self) -> &EventApplication {
        match self {
            Self::Unchanged(record) | Self::Verified(record) | Self::Unverified { record, .. } => record,
        }
    }

    /// Consume the outcome, keeping the record
    #[must_use]
    pub fn into_record(self) -> EventApplication {
        match self {
            Self::Unchanged(record) | Self::Verified(record) | Self::Unverified { record, .. } => record,
        }
    }

    /// True only when the write could not be confirmed
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        matches!(self, Self::Unverified { .. })
    }

    /// Stable label used for metrics and logs
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Unchanged(_) => "unchanged",
            Self::Verified(_) => "verified",
            Self::Unverified { .. } => "unverified",
        }
    }
}

/// Performs single accept/reject transitions against the store
#[derive(Clone)]
pub struct StatusTransitionService {
    store: Arc<dyn ApplicationStatusStore>,
    auth: Arc<dyn AuthContext>,
}

impl StatusTransitionService {
    /// Create a service over the given store and authentication context
    #[must_use]
    pub fn new(store: Arc<dyn ApplicationStatusStore>, auth: Arc<dyn AuthContext>) -> Self {
        Self { store, auth }
    }

    /// Move an application to the status `decision` targets
    ///
    /// # Errors
    ///
    /// - [`ApplicationError::InvalidArgument`] for a blank id (no store access)
    /// - [`ApplicationError::Unauthenticated`] if nobody is signed in
    /// - [`ApplicationError::NotFound`] if the application does not exist
    /// - [`ApplicationError::PermissionDenied`] if the store refuses on authorization grounds
    /// - [`ApplicationError::TransitionFailed`] for any other read or write failure
    #[tracing::instrument(skip(self, id, decision), fields(application_id = %id, decision = %decision))]
    pub async fn transition(
        &self,
        id: &ApplicationId,
        decision: Decision,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let start = Instant::now();
        let result = self.perform(id, decision).await;

        match &result {
            Ok(outcome) => TransitionMetrics::record_outcome(outcome.label(), start.elapsed()),
            Err(error) => {
                tracing::error!(error = %error, "Transition failed");
                TransitionMetrics::record_error(error.kind(), start.elapsed());
            },
        }

        result
    }

    async fn perform(
        &self,
        id: &ApplicationId,
        decision: Decision,
    ) -> Result<TransitionOutcome, ApplicationError> {
        if id.is_blank() {
            return Err(ApplicationError::InvalidArgument("application id is required".to_string()));
        }

        let actor = self
            .auth
            .current_user()
            .ok_or(ApplicationError::Unauthenticated)?;

        let current = match self
            .store
            .fetch_single(ApplicationFilter::by_id(id), Select::WithProvider)
            .await
        {
            Ok(row) => EventApplication::from(row),
            Err(StoreError::NoRows) => return Err(ApplicationError::NotFound(id.clone())),
            Err(error) => return Err(classify(error)),
        };

        let target = decision.target_status();
        if current.status == target {
            tracing::debug!(status = %target, "Already at target status, skipping write");
            return Ok(TransitionOutcome::Unchanged(current));
        }

        let filter = ApplicationFilter::by_id(id).status(current.status);
        let affected = self
            .store
            .update(filter, StatusPatch { status: target })
            .await
            .map_err(classify)?;
        tracing::debug!(actor = %actor.id, affected, "Status update accepted");

        let expected = current.with_status(target);
        let unverified = |observed_status, reason| TransitionOutcome::Unverified {
            record: expected.clone(),
            previous_status: current.status,
            observed_status,
            reason,
        };

        let outcome = match self
            .store
            .fetch_single(ApplicationFilter::by_id(id), Select::WithProvider)
            .await
        {
            Ok(row) if row.status == target => TransitionOutcome::Verified(EventApplication::from(row)),
            Ok(row) => unverified(Some(row.status), UnverifiedReason::StatusMismatch),
            Err(StoreError::NoRows) => unverified(None, UnverifiedReason::RowMissing),
            Err(error) => unverified(None, UnverifiedReason::ReadFailed(error)),
        };

        match &outcome {
            TransitionOutcome::Unverified {
                previous_status,
                observed_status,
                reason,
                ..
            } => tracing::warn!(
                previous_status = %previous_status,
                observed_status = ?observed_status,
                reason = %reason,
                "Transition could not be verified"
            ),
            _ => tracing::info!(status = %target, "Transition verified"),
        }

        Ok(outcome)
    }
}

impl std::fmt::Debug for StatusTransitionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTransitionService").finish_non_exhaustive()
    }
}

fn classify(error: StoreError) -> ApplicationError {
    if error.is_permission_denied() {
        ApplicationError::PermissionDenied(error.to_string())
    } else {
        ApplicationError::TransitionFailed(error.to_string())
    }
}
