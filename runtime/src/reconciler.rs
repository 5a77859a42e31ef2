//! Application list reconciliation.
//!
//! [`ApplicationListReducer`] keeps an event owner's local copy of "all
//! applications for this event" and merges server snapshots into it.
//!
//! # Snapshot merging
//!
//! A snapshot only replaces local state when [`is_significant_change`] says it
//! differs in length, membership, or any status. Otherwise the existing list is
//! kept as-is (same allocation), preserving anything the view attached to it.
//!
//! # Local overrides
//!
//! A transition this client performed is recorded as a [`LocalOverride`]
//! stamped with the state revision at which it was confirmed, and patched into
//! the list immediately. Each refresh is stamped with the revision at which it
//! was issued. While an override is live:
//!
//! - a snapshot issued before the override keeps the override's status
//! - a later snapshot ranking the status lower (a stale `pending`) keeps it too
//! - a later snapshot that agrees, or shows a different terminal status,
//!   retires the override
//!
//! Overrides from unverified writes yield to the first later snapshot.

use crate::metrics::ReconcileMetrics;
use gigmarket_core::application::{ApplicationId, ApplicationStatus, EventApplication, EventId};
use gigmarket_core::effect::Effect;
use gigmarket_core::event::{EventStatus, is_action_allowed};
use gigmarket_core::reducer::Reducer;
use gigmarket_core::store::{ApplicationFilter, ApplicationStatusStore, Select};
use smallvec::{SmallVec, smallvec};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// True if `snapshot` materially differs from `local`.
///
/// Lists differ when their lengths differ, when a snapshot id is missing
/// locally, or when any shared id has a different status. Order and fields
/// other than status are ignored.
#[must_use]
pub fn is_significant_change(local: &[EventApplication], snapshot: &[EventApplication]) -> bool {
    if local.len() != snapshot.len() {
        return true;
    }

    let local_status: HashMap<&ApplicationId, ApplicationStatus> =
        local.iter().map(|record| (&record.id, record.status)).collect();

    snapshot.iter().any(|record| {
        local_status
            .get(&record.id)
            .is_none_or(|status| *status != record.status)
    })
}

/// A status this client wrote, pinned over older snapshots
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalOverride {
    /// Status the write set
    pub status: ApplicationStatus,
    /// State revision at which the write was confirmed
    pub revision: u64,
    /// Whether the write was read back
    pub verified: bool,
}

/// State of one event's application list
#[derive(Clone, Debug)]
pub struct ApplicationListState {
    /// Event whose applications are listed
    pub event_id: EventId,
    /// Reconciled list; replaced wholesale only on significant change
    pub applications: Arc<Vec<EventApplication>>,
    /// Parent event status, once known
    pub event_status: Option<EventStatus>,
    /// Ids with a transition in flight from this view
    pub processing: HashSet<ApplicationId>,
    /// Live local overrides by id
    pub overrides: HashMap<ApplicationId, LocalOverride>,
    /// Logical clock, bumped by refreshes and confirmed transitions
    pub revision: u64,
    /// Issue revision of the newest snapshot applied
    pub applied_snapshot: u64,
    /// A refresh is outstanding
    pub loading: bool,
    /// Last refresh or transition error
    pub last_error: Option<String>,
}

impl ApplicationListState {
    /// Empty list for `event_id`
    #[must_use]
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            applications: Arc::new(Vec::new()),
            event_status: None,
            processing: HashSet::new(),
            overrides: HashMap::new(),
            revision: 0,
            applied_snapshot: 0,
            loading: false,
            last_error: None,
        }
    }

    /// Look up an application by id
    #[must_use]
    pub fn application(&self, id: &ApplicationId) -> Option<&EventApplication> {
        self.applications.iter().find(|record| &record.id == id)
    }

    /// True while a transition on `id` is in flight from this view
    #[must_use]
    pub fn is_processing(&self, id: &ApplicationId) -> bool {
        self.processing.contains(id)
    }

    /// False once the event is known to be closed
    #[must_use]
    pub fn actions_allowed(&self) -> bool {
        self.event_status.is_none_or(is_action_allowed)
    }

    /// True if accept/reject controls for `id` should be enabled
    #[must_use]
    pub fn can_act_on(&self, id: &ApplicationId) -> bool {
        self.actions_allowed()
            && !self.is_processing(id)
            && self
                .application(id)
                .is_some_and(|record| record.status == ApplicationStatus::Pending)
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// Actions for the application list
#[derive(Clone, Debug, PartialEq)]
pub enum ListAction {
    /// Fetch a fresh snapshot and the event status
    Refresh,

    /// A refresh completed
    SnapshotLoaded {
        /// Revision at which the refresh was issued
        issued_at: u64,
        /// Rows returned
        applications: Vec<EventApplication>,
    },

    /// A snapshot fetched elsewhere, treated as issued now
    SnapshotReceived {
        /// Rows returned
        applications: Vec<EventApplication>,
    },

    /// A refresh failed; local state is kept
    RefreshFailed {
        /// Revision at which the refresh was issued
        issued_at: u64,
        /// Error message
        error: String,
    },

    /// A transition on `id` started from this view
    TransitionStarted {
        /// Application id
        id: ApplicationId,
    },

    /// A transition on `id` returned without error
    TransitionConfirmed {
        /// Application id
        id: ApplicationId,
        /// Status now presented for it
        status: ApplicationStatus,
        /// Whether the write was read back
        verified: bool,
    },

    /// A transition on `id` failed
    TransitionFailed {
        /// Application id
        id: ApplicationId,
        /// Error message
        error: String,
    },

    /// The parent event's status is known or changed
    EventStatusChanged {
        /// New status
        status: EventStatus,
    },
}

/// Environment for the list reducer
#[derive(Clone)]
pub struct ListEnvironment {
    /// Store snapshots are fetched from
    pub store: Arc<dyn ApplicationStatusStore>,
}

impl ListEnvironment {
    /// Create an environment over `store`
    #[must_use]
    pub fn new(store: Arc<dyn ApplicationStatusStore>) -> Self {
        Self { store }
    }
}

/// Reducer for [`ApplicationListState`]
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplicationListReducer;

impl ApplicationListReducer {
    fn refresh_effects(state: &ApplicationListState, issued_at: u64, env: &ListEnvironment) -> SmallVec<[Effect<ListAction>; 4]> {
        let snapshot = {
            let store = Arc::clone(&env.store);
            let event_id = state.event_id.clone();
            Effect::future(async move {
                let result = store
                    .fetch(ApplicationFilter::for_event(&event_id), Select::WithProvider)
                    .await;
                Some(match result {
                    Ok(rows) => ListAction::SnapshotLoaded {
                        issued_at,
                        applications: rows.into_iter().map(EventApplication::from).collect(),
                    },
                    Err(error) => ListAction::RefreshFailed {
                        issued_at,
                        error: error.to_string(),
                    },
                })
            })
        };

        let event = {
            let store = Arc::clone(&env.store);
            let event_id = state.event_id.clone();
            Effect::future(async move {
                match store.fetch_event(&event_id).await {
                    Ok(Some(event)) => Some(ListAction::EventStatusChanged {
                        status: event.status,
                    }),
                    Ok(None) => {
                        tracing::debug!(event_id = %event_id, "Event not visible, status unknown");
                        None
                    },
                    Err(error) => {
                        tracing::warn!(event_id = %event_id, error = %error, "Failed to load event status");
                        None
                    },
                }
            })
        };

        smallvec![snapshot, event]
    }

    fn reconcile(state: &mut ApplicationListState, issued_at: u64, snapshot: Vec<EventApplication>) {
        let ids: HashSet<ApplicationId> = snapshot.iter().map(|record| record.id.clone()).collect();
        let merged: Vec<EventApplication> = snapshot
            .into_iter()
            .map(|record| apply_override(&mut state.overrides, issued_at, record))
            .collect();

        // Rows gone from a later snapshot take their overrides with them
        state
            .overrides
            .retain(|id, pinned| issued_at < pinned.revision || ids.contains(id));

        let replaced = is_significant_change(&state.applications, &merged);
        if replaced {
            state.applications = Arc::new(merged);
        }

        tracing::debug!(
            event_id = %state.event_id,
            issued_at,
            replaced,
            overrides = state.overrides.len(),
            "Snapshot reconciled"
        );
        ReconcileMetrics::record_snapshot(replaced);

        state.loading = false;
        state.last_error = None;
    }
}

fn apply_override(
    overrides: &mut HashMap<ApplicationId, LocalOverride>,
    issued_at: u64,
    record: EventApplication,
) -> EventApplication {
    let Some(pinned) = overrides.get(&record.id).copied() else {
        return record;
    };

    if issued_at < pinned.revision {
        // Issued before our write landed
        return pinned_record(record, pinned.status);
    }

    if pinned.verified && record.status.rank() < pinned.status.rank() {
        // Stale read that would regress a confirmed write
        return pinned_record(record, pinned.status);
    }

    overrides.remove(&record.id);
    record
}

fn pinned_record(record: EventApplication, status: ApplicationStatus) -> EventApplication {
    if record.status == status {
        record
    } else {
        record.with_status(status)
    }
}

impl Reducer for ApplicationListReducer {
    type State = ApplicationListState;
    type Action = ListAction;
    type Environment = ListEnvironment;

    fn reduce(
        &self,
        state: &mut ApplicationListState,
        action: ListAction,
        env: &ListEnvironment,
    ) -> SmallVec<[Effect<ListAction>; 4]> {
        match action {
            ListAction::Refresh => {
                let issued_at = state.bump();
                state.loading = true;
                tracing::debug!(event_id = %state.event_id, issued_at, "Refreshing applications");
                Self::refresh_effects(state, issued_at, env)
            },

            ListAction::SnapshotLoaded {
                issued_at,
                applications,
            } => {
                if issued_at < state.applied_snapshot {
                    tracing::debug!(
                        issued_at,
                        applied = state.applied_snapshot,
                        "Discarding snapshot older than the one already applied"
                    );
                    return SmallVec::new();
                }
                state.applied_snapshot = issued_at;
                Self::reconcile(state, issued_at, applications);
                SmallVec::new()
            },

            ListAction::SnapshotReceived { applications } => {
                let issued_at = state.bump();
                state.applied_snapshot = issued_at;
                Self::reconcile(state, issued_at, applications);
                SmallVec::new()
            },

            ListAction::RefreshFailed { issued_at, error } => {
                tracing::warn!(event_id = %state.event_id, issued_at, error = %error, "Refresh failed, keeping local list");
                state.loading = false;
                state.last_error = Some(error);
                SmallVec::new()
            },

            ListAction::TransitionStarted { id } => {
                state.processing.insert(id);
                SmallVec::new()
            },

            ListAction::TransitionConfirmed { id, status, verified } => {
                state.processing.remove(&id);
                let revision = state.bump();
                state.overrides.insert(
                    id.clone(),
                    LocalOverride {
                        status,
                        revision,
                        verified,
                    },
                );

                let needs_patch = state
                    .application(&id)
                    .is_some_and(|record| record.status != status);
                if needs_patch {
                    let patched = state
                        .applications
                        .iter()
                        .map(|record| {
                            if record.id == id {
                                record.with_status(status)
                            } else {
                                record.clone()
                            }
                        })
                        .collect();
                    state.applications = Arc::new(patched);
                }

                tracing::debug!(application_id = %id, status = %status, verified, revision, "Local override recorded");
                SmallVec::new()
            },

            ListAction::TransitionFailed { id, error } => {
                state.processing.remove(&id);
                state.last_error = Some(error);
                SmallVec::new()
            },

            ListAction::EventStatusChanged { status } => {
                state.event_status = Some(status);
                SmallVec::new()
            },
        }
    }
}
