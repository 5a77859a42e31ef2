//! Relational store abstraction for applications.
//!
//! This module defines the only contract the lifecycle needs from the remote
//! relational store: equality-filtered reads, a status update, an insert and
//! an event lookup. A "single row" read is layered on top of `fetch` so that
//! "zero rows" is distinguishable from every other failure.
//!
//! # Implementations
//!
//! - `PostgresApplicationStore` (in `gigmarket-postgres`): production
//! - `InMemoryApplicationStore` (in `gigmarket-testing`): fast, deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return explicit `Pin<Box<dyn Future>>` so the store can be shared
//! as `Arc<dyn ApplicationStatusStore>` and captured by effects.

use crate::application::{
    ApplicationId, ApplicationRow, ApplicationStatus, EventId, NewApplication, UserId,
};
use crate::event::Event;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A single-row read matched nothing
    #[error("No rows matched")]
    NoRows,

    /// A single-row read matched more than one row
    #[error("Expected a single row, found {0}")]
    MultipleRows(usize),

    /// The store refused the operation on authorization grounds
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The store could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// The store rejected or failed the query
    #[error("Query failed: {message}")]
    Query {
        /// Backend error code (SQLSTATE for `PostgreSQL`), if any
        code: Option<String>,
        /// Backend message
        message: String,
    },
}

/// SQLSTATE `insufficient_privilege`
pub const INSUFFICIENT_PRIVILEGE: &str = "42501";

impl StoreError {
    /// Build a query error without a backend code
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            code: None,
            message: message.into(),
        }
    }

    /// True if this error means the caller lacks rights for the operation.
    ///
    /// Recognises the explicit variant, SQLSTATE `42501`, and backend messages
    /// that mention permission denial or row-level security.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::PermissionDenied(_) => true,
            Self::Query { code, message } => {
                if code.as_deref() == Some(INSUFFICIENT_PRIVILEGE) {
                    return true;
                }
                let message = message.to_ascii_lowercase();
                message.contains("permission denied") || message.contains("row-level security")
            },
            _ => false,
        }
    }
}

/// Which columns a read returns
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Select {
    /// Application columns only
    #[default]
    Columns,
    /// Application columns plus the provider summary join
    WithProvider,
}

/// Equality filter over application columns.
///
/// Every populated field must match. An empty filter matches every row, which
/// stores refuse for updates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplicationFilter {
    /// Match on id
    pub id: Option<ApplicationId>,
    /// Match on parent event
    pub event_id: Option<EventId>,
    /// Match on provider
    pub provider_id: Option<UserId>,
    /// Match on current status
    pub status: Option<ApplicationStatus>,
}

impl ApplicationFilter {
    /// Filter on a single application id
    #[must_use]
    pub fn by_id(id: &ApplicationId) -> Self {
        Self {
            id: Some(id.clone()),
            ..Self::default()
        }
    }

    /// Filter on all applications of an event
    #[must_use]
    pub fn for_event(event_id: &EventId) -> Self {
        Self {
            event_id: Some(event_id.clone()),
            ..Self::default()
        }
    }

    /// Additionally match on provider
    #[must_use]
    pub fn provider(mut self, provider_id: &UserId) -> Self {
        self.provider_id = Some(provider_id.clone());
        self
    }

    /// Additionally match on status
    #[must_use]
    pub const fn status(mut self, status: ApplicationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// True when no column is constrained
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.event_id.is_none()
            && self.provider_id.is_none()
            && self.status.is_none()
    }

    /// Evaluate the filter against a row
    #[must_use]
    pub fn matches(&self, row: &ApplicationRow) -> bool {
        self.id.as_ref().is_none_or(|id| &row.id == id)
            && self.event_id.as_ref().is_none_or(|id| &row.event_id == id)
            && self
                .provider_id
                .as_ref()
                .is_none_or(|id| &row.provider_id == id)
            && self.status.is_none_or(|status| row.status == status)
    }
}

/// Column patch applied by [`ApplicationStatusStore::update`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusPatch {
    /// New status
    pub status: ApplicationStatus,
}

/// The authoritative persisted record of each application and its status.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; they are shared across views and
/// captured by effects.
pub trait ApplicationStatusStore: Send + Sync {
    /// Read every row matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails.
    fn fetch(&self, filter: ApplicationFilter, select: Select) -> StoreFuture<'_, Vec<ApplicationRow>>;

    /// Apply `patch` to every row matching `filter`, returning the number of
    /// rows the store reports as affected.
    ///
    /// Callers that need certainty re-read the row; the count is advisory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] for an empty filter, or whatever the
    /// backend reports (including permission failures).
    fn update(&self, filter: ApplicationFilter, patch: StatusPatch) -> StoreFuture<'_, u64>;

    /// Insert a pending application and return the stored row.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the insert fails.
    fn insert(&self, application: NewApplication) -> StoreFuture<'_, ApplicationRow>;

    /// Look up an event by id.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the read fails. A missing event is `Ok(None)`.
    fn fetch_event(&self, id: &EventId) -> StoreFuture<'_, Option<Event>>;

    /// Read exactly one row.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoRows`] if nothing matched
    /// - [`StoreError::MultipleRows`] if more than one row matched
    /// - any error from [`fetch`](Self::fetch)
    fn fetch_single(&self, filter: ApplicationFilter, select: Select) -> StoreFuture<'_, ApplicationRow> {
        Box::pin(async move {
            let mut rows = self.fetch(filter, select).await?;
            match rows.len() {
                0 => Err(StoreError::NoRows),
                1 => Ok(rows.swap_remove(0)),
                n => Err(StoreError::MultipleRows(n)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(id: &str, provider: &str, status: ApplicationStatus) -> ApplicationRow {
        ApplicationRow {
            id: ApplicationId::new(id),
            event_id: EventId::new("event-1"),
            provider_id: UserId::new(provider),
            service_category: "Buffet".to_string(),
            message: String::new(),
            status,
            created_at: Utc::now(),
            provider: None,
        }
    }

    #[test]
    fn filter_requires_every_populated_column() {
        let pending = row("a", "p1", ApplicationStatus::Pending);

        assert!(ApplicationFilter::by_id(&ApplicationId::new("a")).matches(&pending));
        assert!(!ApplicationFilter::by_id(&ApplicationId::new("b")).matches(&pending));

        let compound = ApplicationFilter::for_event(&EventId::new("event-1"))
            .provider(&UserId::new("p1"))
            .status(ApplicationStatus::Pending);
        assert!(compound.matches(&pending));
        assert!(!compound.matches(&row("a", "p2", ApplicationStatus::Pending)));
        assert!(!compound.matches(&row("a", "p1", ApplicationStatus::Accepted)));
    }

    #[test]
    fn empty_filter_is_detected() {
        assert!(ApplicationFilter::default().is_empty());
        assert!(!ApplicationFilter::for_event(&EventId::new("e")).is_empty());
    }

    #[test]
    fn permission_failures_are_recognised() {
        assert!(StoreError::PermissionDenied("nope".into()).is_permission_denied());
        assert!(StoreError::Query {
            code: Some("42501".into()),
            message: "insufficient_privilege".into(),
        }
        .is_permission_denied());
        assert!(StoreError::query("new row violates row-level security policy").is_permission_denied());
        assert!(StoreError::query("Permission denied for table event_applications").is_permission_denied());

        assert!(!StoreError::query("connection reset").is_permission_denied());
        assert!(!StoreError::Connection("timeout".into()).is_permission_denied());
        assert!(!StoreError::NoRows.is_permission_denied());
    }
}
