//! In-memory application store for testing.
//!
//! [`InMemoryApplicationStore`] keeps rows, events and raw provider joins in
//! memory and counts every call, so tests can assert exactly how many reads and
//! writes an operation issued. Faults can be armed to reproduce the failure
//! modes of a remote store:
//!
//! - failing reads ([`fail_next_fetches`](InMemoryApplicationStore::fail_next_fetches))
//! - failing writes ([`fail_updates`](InMemoryApplicationStore::fail_updates))
//! - writes that report success but change nothing, as when a trigger or
//!   policy swallows them ([`intercept_updates`](InMemoryApplicationStore::intercept_updates))
//! - a verification read that fails or finds nothing right after a write
//!   ([`fail_read_after_update`](InMemoryApplicationStore::fail_read_after_update),
//!   [`hide_row_after_update`](InMemoryApplicationStore::hide_row_after_update))
//!
//! When connected to an [`InMemoryChangeFeed`], every write publishes a change
//! notification the way a database trigger would.

#![allow(clippy::missing_panics_doc)] // Poisoned locks are recovered, never panicked on

use crate::feed_mocks::InMemoryChangeFeed;
use crate::fixtures::row_payload;
use gigmarket_core::application::{ApplicationId, ApplicationRow, ApplicationStatus, EventId, NewApplication, ProviderSummary, UserId};
use gigmarket_core::change_feed::{APPLICATIONS_TABLE, ChangeEvent, ChangeKind};
use gigmarket_core::event::{Event, EventStatus};
use gigmarket_core::store::{
    ApplicationFilter, ApplicationStatusStore, Select, StatusPatch, StoreError, StoreFuture,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

#[derive(Debug, Default)]
struct Tables {
    rows: Vec<ApplicationRow>,
    providers: HashMap<UserId, Value>,
    events: HashMap<EventId, Event>,
}

#[derive(Debug, Default)]
struct Faults {
    failing_fetches: Vec<StoreError>,
    update_failure: Option<StoreError>,
    intercept_updates: bool,
    read_after_update: Option<StoreError>,
    hide_after_update: bool,
    armed_read_failure: Option<StoreError>,
    armed_hide: bool,
    silent: bool,
}

#[derive(Debug, Default)]
struct Counters {
    fetches: AtomicUsize,
    updates: AtomicUsize,
    inserts: AtomicUsize,
    event_fetches: AtomicUsize,
}

#[derive(Debug, Default)]
struct Inner {
    tables: RwLock<Tables>,
    faults: Mutex<Faults>,
    counters: Counters,
    next_id: AtomicU64,
    latency: Mutex<Option<Duration>>,
    feed: Mutex<Option<InMemoryChangeFeed>>,
}

/// In-memory store for fast, deterministic tests.
///
/// Clones share the same tables, faults and counters.
///
/// # Example
///
/// ```
/// use gigmarket_testing::{InMemoryApplicationStore, fixtures};
/// use gigmarket_core::store::{ApplicationFilter, ApplicationStatusStore, Select};
/// use gigmarket_core::application::EventId;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryApplicationStore::new();
/// store.seed_row(fixtures::pending_row("app-1", "event-1", "provider-1"));
///
/// let rows = store
///     .fetch(ApplicationFilter::for_event(&EventId::new("event-1")), Select::Columns)
///     .await?;
/// assert_eq!(rows.len(), 1);
/// assert_eq!(store.fetch_count(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryApplicationStore {
    inner: Arc<Inner>,
}

impl InMemoryApplicationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.inner.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn tables_mut(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.inner.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.inner.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ===== Seeding =====

    /// Insert a row verbatim, keeping its id
    pub fn seed_row(&self, row: ApplicationRow) {
        self.tables_mut().rows.push(row);
    }

    /// Register an event
    pub fn seed_event(&self, event: Event) {
        self.tables_mut().events.insert(event.id.clone(), event);
    }

    /// Register a well-formed provider profile for the join
    pub fn seed_provider(&self, summary: &ProviderSummary) {
        self.set_provider_join(&summary.id, crate::fixtures::provider_join(summary));
    }

    /// Set the raw join value returned for `provider_id`, malformed or not
    pub fn set_provider_join(&self, provider_id: &UserId, join: Value) {
        self.tables_mut().providers.insert(provider_id.clone(), join);
    }

    /// Change an event's status in place
    pub fn set_event_status(&self, id: &EventId, status: EventStatus) {
        if let Some(event) = self.tables_mut().events.get_mut(id) {
            event.status = status;
        }
    }

    /// Change a row's status outside the store API, as another client or a
    /// server-side trigger would; publishes a change when a feed is connected
    pub fn set_status_directly(&self, id: &ApplicationId, status: ApplicationStatus) {
        let changed = {
            let mut tables = self.tables_mut();
            tables.rows.iter_mut().find(|row| &row.id == id).map(|row| {
                let old = row_payload(row);
                row.status = status;
                (old, row.clone())
            })
        };
        if let Some((old, row)) = changed {
            self.publish(ChangeKind::Update, &row, Some(old));
        }
    }

    /// Current copy of a row, bypassing counters and faults
    #[must_use]
    pub fn row(&self, id: &ApplicationId) -> Option<ApplicationRow> {
        self.tables().rows.iter().find(|row| &row.id == id).cloned()
    }

    /// Number of stored application rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables().rows.len()
    }

    /// True if no application rows are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables().rows.is_empty()
    }

    // ===== Behaviour =====

    /// Delay every call by `latency`, giving concurrent callers a chance to interleave
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    /// Publish a change notification for every write
    pub fn connect_feed(&self, feed: &InMemoryChangeFeed) {
        *self.inner.feed.lock().unwrap_or_else(PoisonError::into_inner) = Some(feed.clone());
    }

    /// Stop (or resume) publishing notifications, modelling a writer that never
    /// sees its own change
    pub fn silence_notifications(&self, silent: bool) {
        self.faults().silent = silent;
    }

    // ===== Faults =====

    /// Fail the next `count` reads with `error`
    pub fn fail_next_fetches(&self, count: usize, error: &StoreError) {
        let mut faults = self.faults();
        faults
            .failing_fetches
            .extend(std::iter::repeat_n(error.clone(), count));
    }

    /// Fail every update with `error` until [`clear_faults`](Self::clear_faults)
    pub fn fail_updates(&self, error: StoreError) {
        self.faults().update_failure = Some(error);
    }

    /// Accept updates without applying them
    pub fn intercept_updates(&self, intercept: bool) {
        self.faults().intercept_updates = intercept;
    }

    /// Fail the first read issued after each successful update
    pub fn fail_read_after_update(&self, error: StoreError) {
        self.faults().read_after_update = Some(error);
    }

    /// Make the first read after each successful update return no rows
    pub fn hide_row_after_update(&self, hide: bool) {
        self.faults().hide_after_update = hide;
    }

    /// Disarm every fault
    pub fn clear_faults(&self) {
        let silent = self.faults().silent;
        *self.faults() = Faults {
            silent,
            ..Faults::default()
        };
    }

    // ===== Counters =====

    /// Application reads issued
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.inner.counters.fetches.load(Ordering::SeqCst)
    }

    /// Updates issued, including failed and intercepted ones
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.inner.counters.updates.load(Ordering::SeqCst)
    }

    /// Inserts issued
    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.inner.counters.inserts.load(Ordering::SeqCst)
    }

    /// Event reads issued
    #[must_use]
    pub fn event_fetch_count(&self) -> usize {
        self.inner.counters.event_fetches.load(Ordering::SeqCst)
    }

    /// Zero every counter
    pub fn reset_counters(&self) {
        let counters = &self.inner.counters;
        counters.fetches.store(0, Ordering::SeqCst);
        counters.updates.store(0, Ordering::SeqCst);
        counters.inserts.store(0, Ordering::SeqCst);
        counters.event_fetches.store(0, Ordering::SeqCst);
    }

    // ===== Internals =====

    async fn simulate_latency(&self) {
        let latency = *self.inner.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn publish(&self, kind: ChangeKind, row: &ApplicationRow, old: Option<Value>) {
        if self.faults().silent {
            return;
        }
        let feed = self.inner.feed.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(feed) = feed {
            feed.publish(ChangeEvent {
                kind,
                table: APPLICATIONS_TABLE.to_string(),
                new: Some(row_payload(row)),
                old,
            });
        }
    }

    fn read(&self, filter: &ApplicationFilter, select: Select) -> Result<Vec<ApplicationRow>, StoreError> {
        {
            let mut faults = self.faults();
            if !faults.failing_fetches.is_empty() {
                return Err(faults.failing_fetches.remove(0));
            }
            if let Some(error) = faults.armed_read_failure.take() {
                return Err(error);
            }
            if std::mem::take(&mut faults.armed_hide) {
                return Ok(Vec::new());
            }
        }

        let tables = self.tables();
        let rows = tables
            .rows
            .iter()
            .filter(|row| filter.matches(row))
            .map(|row| {
                let mut row = row.clone();
                row.provider = match select {
                    Select::Columns => None,
                    Select::WithProvider => tables.providers.get(&row.provider_id).cloned(),
                };
                row
            })
            .collect();
        Ok(rows)
    }

    fn write(&self, filter: &ApplicationFilter, patch: StatusPatch) -> Result<u64, StoreError> {
        if filter.is_empty() {
            return Err(StoreError::query("refusing update without a filter"));
        }

        let intercept = {
            let faults = self.faults();
            if let Some(error) = faults.update_failure.clone() {
                return Err(error);
            }
            faults.intercept_updates
        };

        let changed: Vec<(Value, ApplicationRow)> = {
            let mut tables = self.tables_mut();
            tables
                .rows
                .iter_mut()
                .filter(|row| filter.matches(row))
                .map(|row| {
                    let old = row_payload(row);
                    if !intercept {
                        row.status = patch.status;
                    }
                    (old, row.clone())
                })
                .collect()
        };

        {
            let mut faults = self.faults();
            faults.armed_read_failure = faults.read_after_update.clone();
            faults.armed_hide = faults.hide_after_update;
        }

        if !intercept {
            for (old, row) in &changed {
                self.publish(ChangeKind::Update, row, Some(old.clone()));
            }
        }

        Ok(changed.len() as u64)
    }
}

impl ApplicationStatusStore for InMemoryApplicationStore {
    fn fetch(&self, filter: ApplicationFilter, select: Select) -> StoreFuture<'_, Vec<ApplicationRow>> {
        Box::pin(async move {
            self.inner.counters.fetches.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency().await;
            self.read(&filter, select)
        })
    }

    fn update(&self, filter: ApplicationFilter, patch: StatusPatch) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            self.inner.counters.updates.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency().await;
            self.write(&filter, patch)
        })
    }

    fn insert(&self, application: NewApplication) -> StoreFuture<'_, ApplicationRow> {
        Box::pin(async move {
            self.inner.counters.inserts.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency().await;

            let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let row = ApplicationRow {
                id: ApplicationId::new(format!("app-{id}")),
                status: application.status(),
                event_id: application.event_id,
                provider_id: application.provider_id,
                service_category: application.service_category,
                message: application.message,
                created_at: application.created_at,
                provider: None,
            };
            self.tables_mut().rows.push(row.clone());
            self.publish(ChangeKind::Insert, &row, None);
            Ok(row)
        })
    }

    fn fetch_event(&self, id: &EventId) -> StoreFuture<'_, Option<Event>> {
        let id = id.clone();
        Box::pin(async move {
            self.inner.counters.event_fetches.fetch_add(1, Ordering::SeqCst);
            self.simulate_latency().await;
            Ok(self.tables().events.get(&id).cloned())
        })
    }
}
