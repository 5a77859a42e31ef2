//! Client facade for the application lifecycle.
//!
//! [`MarketplaceClient`] is what a UI layer holds. It applies to events, runs
//! guarded accept/reject transitions, and hands out two kinds of live view:
//!
//! - [`EventApplications`]: the event owner's reconciled list, with its own
//!   concurrency guard and per-id processing flags
//! - [`MyApplication`]: the signed-in provider's own application for an event,
//!   kept current by the change feed until unsubscribed or dropped

use crate::config::ClientConfig;
use crate::error::RuntimeError;
use crate::guard::{ConcurrencyGuard, GuardOutcome};
use crate::reconciler::{ApplicationListReducer, ApplicationListState, ListAction, ListEnvironment};
use crate::store::Store;
use crate::subscription::Subscription;
use crate::tracker::{ApplicationTrackerReducer, TrackerAction, TrackerEnvironment, TrackerState};
use crate::transition::{StatusTransitionService, TransitionOutcome};
use futures::StreamExt;
use gigmarket_core::application::{ApplicationId, Decision, EventApplication, EventId, NewApplication, UserId};
use gigmarket_core::change_feed::{ChangeFeed, ChangeKind, ChangeStream, EventTypeFilter, TableScope};
use gigmarket_core::environment::{AuthContext, Clock};
use gigmarket_core::error::ApplicationError;
use gigmarket_core::event::EventStatus;
use gigmarket_core::store::{ApplicationFilter, ApplicationStatusStore, Select, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Reducer store behind an [`EventApplications`] view
pub type ListStore = Store<ApplicationListState, ListAction, ListEnvironment, ApplicationListReducer>;
/// Reducer store behind a [`MyApplication`] tracker
pub type TrackerStore = Store<TrackerState, TrackerAction, TrackerEnvironment, ApplicationTrackerReducer>;

struct ClientInner {
    store: Arc<dyn ApplicationStatusStore>,
    feed: Arc<dyn ChangeFeed>,
    auth: Arc<dyn AuthContext>,
    clock: Arc<dyn Clock>,
    transitions: StatusTransitionService,
    guard: ConcurrencyGuard,
    config: ClientConfig,
}

/// Entry point for the UI layer.
///
/// Cheap to clone; clones share collaborators and the client-level guard.
///
/// # Example
///
/// ```ignore
/// let client = MarketplaceClient::new(store, feed, auth, Arc::new(SystemClock));
///
/// let created = client
///     .apply_to_event(&event_id, &provider_id, "Buffet", "Available all weekend")
///     .await?;
/// let outcome = client.approve_application(&created.id, &provider_id).await?;
/// ```
#[derive(Clone)]
pub struct MarketplaceClient {
    inner: Arc<ClientInner>,
}

impl MarketplaceClient {
    /// Create a client with default configuration
    #[must_use]
    pub fn new(
        store: Arc<dyn ApplicationStatusStore>,
        feed: Arc<dyn ChangeFeed>,
        auth: Arc<dyn AuthContext>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(store, feed, auth, clock, ClientConfig::default())
    }

    /// Create a client with explicit configuration
    #[must_use]
    pub fn with_config(
        store: Arc<dyn ApplicationStatusStore>,
        feed: Arc<dyn ChangeFeed>,
        auth: Arc<dyn AuthContext>,
        clock: Arc<dyn Clock>,
        config: ClientConfig,
    ) -> Self {
        let transitions = StatusTransitionService::new(Arc::clone(&store), Arc::clone(&auth));
        Self {
            inner: Arc::new(ClientInner {
                store,
                feed,
                auth,
                clock,
                transitions,
                guard: ConcurrencyGuard::new(),
                config,
            }),
        }
    }

    /// The transition service this client uses
    #[must_use]
    pub fn transitions(&self) -> &StatusTransitionService {
        &self.inner.transitions
    }

    /// Create a pending application for `provider_id` on `event_id`.
    ///
    /// # Errors
    ///
    /// - [`ApplicationError::InvalidArgument`] for a blank id or category
    /// - [`ApplicationError::Unauthenticated`] if nobody is signed in
    /// - [`ApplicationError::AlreadyApplied`] if the pair already has a row
    /// - [`ApplicationError::PermissionDenied`] or [`ApplicationError::Store`] if the store fails
    #[tracing::instrument(skip(self, event_id, provider_id, category, message), fields(event_id = %event_id, provider_id = %provider_id))]
    pub async fn apply_to_event(
        &self,
        event_id: &EventId,
        provider_id: &UserId,
        category: &str,
        message: &str,
    ) -> Result<EventApplication, ApplicationError> {
        if event_id.is_blank() {
            return Err(ApplicationError::InvalidArgument("event id is required".to_string()));
        }
        if provider_id.is_blank() {
            return Err(ApplicationError::InvalidArgument("provider id is required".to_string()));
        }
        if category.trim().is_empty() {
            return Err(ApplicationError::InvalidArgument("service category is required".to_string()));
        }
        if self.inner.auth.current_user().is_none() {
            return Err(ApplicationError::Unauthenticated);
        }

        let existing = self
            .inner
            .store
            .fetch(ApplicationFilter::for_event(event_id).provider(provider_id), Select::Columns)
            .await
            .map_err(apply_error)?;
        if !existing.is_empty() {
            tracing::debug!("Refusing duplicate application");
            return Err(ApplicationError::AlreadyApplied {
                event_id: event_id.clone(),
                provider_id: provider_id.clone(),
            });
        }

        let row = self
            .inner
            .store
            .insert(NewApplication {
                event_id: event_id.clone(),
                provider_id: provider_id.clone(),
                service_category: category.to_string(),
                message: message.to_string(),
                created_at: self.inner.clock.now(),
            })
            .await
            .map_err(apply_error)?;

        tracing::info!(application_id = %row.id, "Application created");
        Ok(EventApplication::from(row))
    }

    /// Accept an application, skipping if this client already has one in flight.
    ///
    /// # Errors
    ///
    /// [`ApplicationError::InvalidArgument`] for blank ids, otherwise whatever
    /// [`StatusTransitionService::transition`] returns.
    #[tracing::instrument(skip(self, id, provider_id), fields(application_id = %id, provider_id = %provider_id))]
    pub async fn approve_application(
        &self,
        id: &ApplicationId,
        provider_id: &UserId,
    ) -> Result<GuardOutcome<TransitionOutcome>, ApplicationError> {
        validate_transition_args(id, provider_id)?;
        let transitions = &self.inner.transitions;
        self.inner
            .guard
            .with_lock(id, move || transitions.transition(id, Decision::Accept))
            .await
            .transpose()
    }

    /// Reject an application, skipping if this client already has one in flight.
    ///
    /// # Errors
    ///
    /// [`ApplicationError::InvalidArgument`] for blank ids, otherwise whatever
    /// [`StatusTransitionService::transition`] returns.
    #[tracing::instrument(skip(self, id, provider_id), fields(application_id = %id, provider_id = %provider_id))]
    pub async fn reject_application(
        &self,
        id: &ApplicationId,
        provider_id: &UserId,
    ) -> Result<GuardOutcome<TransitionOutcome>, ApplicationError> {
        validate_transition_args(id, provider_id)?;
        let transitions = &self.inner.transitions;
        self.inner
            .guard
            .with_lock(id, move || transitions.transition(id, Decision::Reject))
            .await
            .transpose()
    }

    /// Owner-side view of an event's applications.
    ///
    /// The view starts empty; call [`EventApplications::refresh`] to load it.
    #[must_use]
    pub fn applications_for_event(&self, event_id: &EventId) -> EventApplications {
        let store = Store::with_broadcast_capacity(
            ApplicationListState::new(event_id.clone()),
            ApplicationListReducer,
            ListEnvironment::new(Arc::clone(&self.inner.store)),
            self.inner.config.broadcast_capacity,
        );

        EventApplications {
            event_id: event_id.clone(),
            store,
            guard: ConcurrencyGuard::new(),
            transitions: self.inner.transitions.clone(),
        }
    }

    /// Provider-side tracker for the signed-in user's application to `event_id`.
    ///
    /// Subscribes to the change feed, then starts the initial read without
    /// waiting for it.
    #[tracing::instrument(skip(self, event_id), fields(event_id = %event_id))]
    pub async fn my_application(&self, event_id: &EventId) -> MyApplication {
        let store = Store::with_broadcast_capacity(
            TrackerState::new(event_id.clone()),
            ApplicationTrackerReducer,
            TrackerEnvironment::new(Arc::clone(&self.inner.store), Arc::clone(&self.inner.auth)),
            self.inner.config.broadcast_capacity,
        );

        let filter = EventTypeFilter::Only(vec![ChangeKind::Insert, ChangeKind::Update]);
        let subscription = match self.inner.feed.subscribe(&TableScope::applications(), filter).await {
            Ok(stream) => {
                tracing::info!("Subscribed to application changes");
                Subscription::active(tokio::spawn(forward_changes(stream, store.clone())))
            },
            Err(error) => {
                tracing::warn!(error = %error, "Change subscription failed, continuing without live updates");
                Subscription::inactive()
            },
        };

        let _ = store.send(TrackerAction::Load).await;

        MyApplication {
            event_id: event_id.clone(),
            store,
            client: self.clone(),
            subscription,
        }
    }
}

impl std::fmt::Debug for MarketplaceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceClient")
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.guard.locked_ids().len())
            .finish_non_exhaustive()
    }
}

fn validate_transition_args(id: &ApplicationId, provider_id: &UserId) -> Result<(), ApplicationError> {
    if id.is_blank() {
        return Err(ApplicationError::InvalidArgument("application id is required".to_string()));
    }
    if provider_id.is_blank() {
        return Err(ApplicationError::InvalidArgument("provider id is required".to_string()));
    }
    Ok(())
}

fn apply_error(error: StoreError) -> ApplicationError {
    if error.is_permission_denied() {
        ApplicationError::PermissionDenied(error.to_string())
    } else {
        ApplicationError::Store(error)
    }
}

async fn forward_changes(mut stream: ChangeStream, store: TrackerStore) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(change) => {
                let _ = store.send(TrackerAction::ChangeReceived(change)).await;
            },
            Err(error) => {
                tracing::warn!(error = %error, "Change stream error, resyncing");
                let _ = store.send(TrackerAction::Resync).await;
            },
        }
    }
    tracing::debug!("Change stream ended");
}

/// Point-in-time copy of an [`EventApplications`] view
#[derive(Clone, Debug, PartialEq)]
pub struct ApplicationsSnapshot {
    /// Reconciled list
    pub applications: Arc<Vec<EventApplication>>,
    /// Ids with a transition in flight
    pub processing: HashSet<ApplicationId>,
    /// Parent event status, once known
    pub event_status: Option<EventStatus>,
    /// A refresh is outstanding
    pub loading: bool,
    /// Last refresh or transition error
    pub last_error: Option<String>,
}

impl ApplicationsSnapshot {
    /// Look up an application by id
    #[must_use]
    pub fn application(&self, id: &ApplicationId) -> Option<&EventApplication> {
        self.applications.iter().find(|record| &record.id == id)
    }

    /// True while a transition on `id` is in flight
    #[must_use]
    pub fn is_processing(&self, id: &ApplicationId) -> bool {
        self.processing.contains(id)
    }

    /// False once the event is known to be closed
    #[must_use]
    pub fn actions_allowed(&self) -> bool {
        self.event_status
            .is_none_or(gigmarket_core::event::is_action_allowed)
    }
}

/// Owner-side live view of one event's applications
#[derive(Clone, Debug)]
pub struct EventApplications {
    event_id: EventId,
    store: ListStore,
    guard: ConcurrencyGuard,
    transitions: StatusTransitionService,
}

impl EventApplications {
    /// Event this view lists
    #[must_use]
    pub const fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// The underlying reducer store
    #[must_use]
    pub const fn store(&self) -> &ListStore {
        &self.store
    }

    /// Current list, processing flags and event status
    pub async fn snapshot(&self) -> ApplicationsSnapshot {
        self.store
            .state(|state| ApplicationsSnapshot {
                applications: Arc::clone(&state.applications),
                processing: state.processing.clone(),
                event_status: state.event_status,
                loading: state.loading,
                last_error: state.last_error.clone(),
            })
            .await
    }

    /// Fetch a fresh snapshot and the event status, and wait for both.
    ///
    /// A failed fetch keeps the current list and is reported through
    /// [`ApplicationsSnapshot::last_error`].
    #[tracing::instrument(skip(self), fields(event_id = %self.event_id))]
    pub async fn refresh(&self) {
        let mut handle = self.store.send(ListAction::Refresh).await;
        handle.wait().await;
    }

    /// Merge a snapshot fetched elsewhere
    pub async fn apply_snapshot(&self, applications: Vec<EventApplication>) {
        let _ = self.store.send(ListAction::SnapshotReceived { applications }).await;
    }

    /// True if accept/reject controls for `id` should be enabled
    pub async fn can_act_on(&self, id: &ApplicationId) -> bool {
        self.store.state(|state| state.can_act_on(id)).await
    }

    /// Accept `id`, patching the list as soon as the write returns.
    ///
    /// Closed-event gating is advisory; check [`can_act_on`](Self::can_act_on)
    /// before offering the action.
    ///
    /// # Errors
    ///
    /// Same as [`MarketplaceClient::approve_application`].
    #[tracing::instrument(skip(self, id, provider_id), fields(application_id = %id))]
    pub async fn approve(
        &self,
        id: &ApplicationId,
        provider_id: &UserId,
    ) -> Result<GuardOutcome<TransitionOutcome>, ApplicationError> {
        self.decide(id, provider_id, Decision::Accept).await
    }

    /// Reject `id`, patching the list as soon as the write returns.
    ///
    /// # Errors
    ///
    /// Same as [`MarketplaceClient::reject_application`].
    #[tracing::instrument(skip(self, id, provider_id), fields(application_id = %id))]
    pub async fn reject(
        &self,
        id: &ApplicationId,
        provider_id: &UserId,
    ) -> Result<GuardOutcome<TransitionOutcome>, ApplicationError> {
        self.decide(id, provider_id, Decision::Reject).await
    }

    async fn decide(
        &self,
        id: &ApplicationId,
        provider_id: &UserId,
        decision: Decision,
    ) -> Result<GuardOutcome<TransitionOutcome>, ApplicationError> {
        validate_transition_args(id, provider_id)?;

        let store = &self.store;
        let transitions = &self.transitions;
        self.guard
            .with_lock(id, move || async move {
                let _ = store.send(ListAction::TransitionStarted { id: id.clone() }).await;

                let result = transitions.transition(id, decision).await;
                let follow_up = match &result {
                    Ok(outcome) => ListAction::TransitionConfirmed {
                        id: id.clone(),
                        status: outcome.record().status,
                        verified: !outcome.is_simulated(),
                    },
                    Err(error) => ListAction::TransitionFailed {
                        id: id.clone(),
                        error: error.to_string(),
                    },
                };
                let _ = store.send(follow_up).await;

                result
            })
            .await
            .transpose()
    }
}

/// Presentation state of a [`MyApplication`] tracker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MyApplicationStatus {
    /// An application exists for the signed-in provider
    pub has_applied: bool,
    /// The application, when known
    pub application: Option<EventApplication>,
    /// The initial read has not completed
    pub loading: bool,
}

/// Provider-side live tracker; dropping it ends the change subscription
#[derive(Debug)]
pub struct MyApplication {
    event_id: EventId,
    store: TrackerStore,
    client: MarketplaceClient,
    subscription: Subscription,
}

impl MyApplication {
    /// Event being tracked
    #[must_use]
    pub const fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// The underlying reducer store
    #[must_use]
    pub const fn store(&self) -> &TrackerStore {
        &self.store
    }

    /// Current presentation state
    pub async fn status(&self) -> MyApplicationStatus {
        self.store
            .state(|state| MyApplicationStatus {
                has_applied: state.has_applied(),
                application: state.application().cloned(),
                loading: !state.is_loaded(),
            })
            .await
    }

    /// Wait for the initial read to complete.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Timeout`] if it does not complete in time.
    pub async fn wait_until_loaded(&self, timeout: Duration) -> Result<(), RuntimeError> {
        self.store.wait_for(TrackerState::is_loaded, timeout).await
    }

    /// Apply to the tracked event as the signed-in provider.
    ///
    /// # Errors
    ///
    /// - [`ApplicationError::AlreadyApplied`] if the tracker already knows an application
    /// - anything [`MarketplaceClient::apply_to_event`] returns
    #[tracing::instrument(skip(self, category, message), fields(event_id = %self.event_id))]
    pub async fn apply(&self, category: &str, message: &str) -> Result<EventApplication, ApplicationError> {
        let existing = self
            .store
            .state(|state| state.application().map(|record| record.provider_id.clone()))
            .await;
        if let Some(provider_id) = existing {
            return Err(ApplicationError::AlreadyApplied {
                event_id: self.event_id.clone(),
                provider_id,
            });
        }

        let user = self
            .client
            .inner
            .auth
            .current_user()
            .ok_or(ApplicationError::Unauthenticated)?;
        let application = self
            .client
            .apply_to_event(&self.event_id, &user.id, category, message)
            .await?;

        let _ = self.store.send(TrackerAction::Applied(application.clone())).await;
        Ok(application)
    }

    /// True while push updates are being received
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    /// Stop receiving push updates; idempotent
    pub fn unsubscribe(&mut self) {
        self.subscription.unsubscribe();
    }
}
