//! Whether the signed-in provider has applied to an event.
//!
//! The tracker loads once, then advances on change notifications. Its state
//! only ever moves forward: `Unknown` to `Absent` or `Present`, and `Present`
//! to a record of equal or higher status rank. A terminal status is final. A failed read is treated as
//! "not applied" so the provider can still apply; the store rejects duplicates.

use crate::metrics::ReconcileMetrics;
use gigmarket_core::application::{ApplicationId, EventApplication, EventId, UserId};
use gigmarket_core::change_feed::ChangeEvent;
use gigmarket_core::effect::Effect;
use gigmarket_core::environment::AuthContext;
use gigmarket_core::reducer::Reducer;
use gigmarket_core::store::{ApplicationFilter, ApplicationStatusStore, Select};
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Where the tracker is in its lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerPhase {
    /// The initial read has not completed
    Unknown,
    /// No application for the pair
    Absent,
    /// The provider's application
    Present(EventApplication),
}

/// State of one (event, provider) tracker
#[derive(Clone, Debug)]
pub struct TrackerState {
    /// Tracked event
    pub event_id: EventId,
    /// Tracked provider, resolved on load
    pub user_id: Option<UserId>,
    /// Current phase
    pub phase: TrackerPhase,
    /// Notifications seen that did not concern the pair
    pub discarded: u64,
}

impl TrackerState {
    /// Fresh tracker for `event_id`
    #[must_use]
    pub const fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            user_id: None,
            phase: TrackerPhase::Unknown,
            discarded: 0,
        }
    }

    /// True once the initial read completed
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        !matches!(self.phase, TrackerPhase::Unknown)
    }

    /// True if an application is known
    #[must_use]
    pub const fn has_applied(&self) -> bool {
        matches!(self.phase, TrackerPhase::Present(_))
    }

    /// The known application
    #[must_use]
    pub const fn application(&self) -> Option<&EventApplication> {
        match &self.phase {
            TrackerPhase::Present(application) => Some(application),
            TrackerPhase::Unknown | TrackerPhase::Absent => None,
        }
    }

    fn concerns_pair(&self, change: &ChangeEvent) -> bool {
        let Some(user) = &self.user_id else {
            return false;
        };
        change.new_str("provider_id") == Some(user.as_str())
            && change.new_str("event_id") == Some(self.event_id.as_str())
    }

    fn advance(&mut self, observed: Option<EventApplication>) {
        match (observed, &self.phase) {
            (None, TrackerPhase::Unknown) => self.phase = TrackerPhase::Absent,
            (None, _) => {},
            (Some(application), TrackerPhase::Present(current))
                if application.status.rank() < current.status.rank()
                    || (current.status.is_terminal() && application.status != current.status) =>
            {
                tracing::debug!(
                    application_id = %application.id,
                    observed = %application.status,
                    current = %current.status,
                    "Ignoring stale application status"
                );
            },
            (Some(application), _) => self.phase = TrackerPhase::Present(application),
        }
    }
}

/// Actions for the tracker
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerAction {
    /// Resolve the user and read the pair's application
    Load,
    /// Initial read finished
    Loaded {
        /// First matching row, if any
        application: Option<EventApplication>,
    },
    /// A change notification arrived
    ChangeReceived(ChangeEvent),
    /// Notifications may have been lost; re-read the pair's application
    Resync,
    /// A refetch triggered by a notification finished
    Refetched(Option<EventApplication>),
    /// The provider applied through this tracker
    Applied(EventApplication),
}

/// Environment for the tracker reducer
#[derive(Clone)]
pub struct TrackerEnvironment {
    /// Store rows are read from
    pub store: Arc<dyn ApplicationStatusStore>,
    /// Source of the signed-in provider
    pub auth: Arc<dyn AuthContext>,
}

impl TrackerEnvironment {
    /// Create an environment
    #[must_use]
    pub fn new(store: Arc<dyn ApplicationStatusStore>, auth: Arc<dyn AuthContext>) -> Self {
        Self { store, auth }
    }
}

/// Reducer for [`TrackerState`]
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplicationTrackerReducer;

impl ApplicationTrackerReducer {
    fn load(event_id: EventId, user: Option<UserId>, env: &TrackerEnvironment) -> Effect<TrackerAction> {
        let Some(user) = user else {
            return Effect::future(async { Some(TrackerAction::Loaded { application: None }) });
        };
        let store = Arc::clone(&env.store);

        Effect::future(async move {
            let filter = ApplicationFilter::for_event(&event_id).provider(&user);
            let application = match store.fetch(filter, Select::WithProvider).await {
                Ok(rows) => {
                    if rows.len() > 1 {
                        tracing::warn!(
                            event_id = %event_id,
                            provider_id = %user,
                            count = rows.len(),
                            "Multiple applications for one provider, using the first"
                        );
                    }
                    rows.into_iter().next().map(EventApplication::from)
                },
                Err(error) => {
                    tracing::warn!(
                        event_id = %event_id,
                        provider_id = %user,
                        error = %error,
                        "Application read failed, treating as not applied"
                    );
                    ReconcileMetrics::record_fail_open();
                    None
                },
            };

            Some(TrackerAction::Loaded { application })
        })
    }

    fn refetch(state: &TrackerState, change: Option<&ChangeEvent>, env: &TrackerEnvironment) -> Effect<TrackerAction> {
        let store = Arc::clone(&env.store);
        let filter = match (change.and_then(|change| change.new_str("id")), &state.user_id) {
            (Some(id), _) => ApplicationFilter::by_id(&ApplicationId::new(id)),
            (None, Some(user)) => ApplicationFilter::for_event(&state.event_id).provider(user),
            (None, None) => return Effect::None,
        };

        Effect::future(async move {
            match store.fetch(filter, Select::WithProvider).await {
                Ok(rows) => Some(TrackerAction::Refetched(
                    rows.into_iter().next().map(EventApplication::from),
                )),
                Err(error) => {
                    tracing::warn!(error = %error, "Application refetch failed");
                    None
                },
            }
        })
    }
}

impl Reducer for ApplicationTrackerReducer {
    type State = TrackerState;
    type Action = TrackerAction;
    type Environment = TrackerEnvironment;

    fn reduce(
        &self,
        state: &mut TrackerState,
        action: TrackerAction,
        env: &TrackerEnvironment,
    ) -> SmallVec<[Effect<TrackerAction>; 4]> {
        match action {
            TrackerAction::Load => {
                // Resolved before the read so notifications racing it still match
                state.user_id = env.auth.current_user().map(|user| user.id);
                smallvec![Self::load(state.event_id.clone(), state.user_id.clone(), env)]
            },

            TrackerAction::Loaded { application } => {
                state.advance(application);
                SmallVec::new()
            },

            TrackerAction::ChangeReceived(change) => {
                if !state.concerns_pair(&change) {
                    state.discarded += 1;
                    ReconcileMetrics::record_push_event(false);
                    tracing::trace!(table = %change.table, kind = ?change.kind, "Ignoring unrelated change");
                    return SmallVec::new();
                }
                ReconcileMetrics::record_push_event(true);
                smallvec![Self::refetch(state, Some(&change), env)]
            },

            TrackerAction::Resync => {
                tracing::debug!(event_id = %state.event_id, "Resyncing after missed notifications");
                smallvec![Self::refetch(state, None, env)]
            },

            TrackerAction::Refetched(application) => {
                state.advance(application);
                SmallVec::new()
            },

            TrackerAction::Applied(application) => {
                state.user_id.get_or_insert_with(|| application.provider_id.clone());
                state.advance(Some(application));
                SmallVec::new()
            },
        }
    }
}
