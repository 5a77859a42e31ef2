//! Change-notification channel for store rows.
//!
//! The store pushes a best-effort stream of row changes. Delivery is not
//! ordered relative to a subscriber's own writes, and a writer may never see
//! the notification for its own change. The channel can only be scoped by
//! table and change kind; it cannot express a compound row predicate, so
//! subscribers filter payloads themselves.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use gigmarket_core::change_feed::{ChangeFeed, EventTypeFilter, TableScope};
//!
//! let mut stream = feed
//!     .subscribe(&TableScope::applications(), EventTypeFilter::All)
//!     .await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(change) if change.new_str("event_id") == Some("event-1") => handle(change),
//!         Ok(_) => {}
//!         Err(e) => tracing::warn!("Change stream error: {}", e),
//!     }
//! }
//! ```

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Table holding applications
pub const APPLICATIONS_TABLE: &str = "event_applications";

/// Errors that can occur on the change channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChangeFeedError {
    /// Failed to connect to the channel
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe
    #[error("Subscription failed for table '{table}': {reason}")]
    SubscriptionFailed {
        /// Table the subscription targeted
        table: String,
        /// The reason for failure
        reason: String,
    },

    /// A notification could not be decoded
    #[error("Malformed notification: {0}")]
    Malformed(String),

    /// The subscriber fell behind and notifications were dropped
    #[error("Subscriber lagged, {0} notifications skipped")]
    Lagged(u64),
}

/// Kind of row change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// Row created
    Insert,
    /// Row modified
    Update,
    /// Row removed
    Delete,
}

/// Which change kinds a subscription receives
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EventTypeFilter {
    /// Every kind
    #[default]
    All,
    /// Only the listed kinds
    Only(Vec<ChangeKind>),
}

impl EventTypeFilter {
    /// True if `kind` passes the filter
    #[must_use]
    pub fn accepts(&self, kind: ChangeKind) -> bool {
        match self {
            Self::All => true,
            Self::Only(kinds) => kinds.contains(&kind),
        }
    }
}

/// Entity-level scope of a subscription
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableScope {
    /// Table name
    pub table: String,
}

impl TableScope {
    /// Scope to a table
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Scope to the applications table
    #[must_use]
    pub fn applications() -> Self {
        Self::new(APPLICATIONS_TABLE)
    }

    /// True if `change` belongs to this scope
    #[must_use]
    pub fn contains(&self, change: &ChangeEvent) -> bool {
        self.table == change.table
    }
}

/// A row change pushed by the store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Kind of change
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// Table the row belongs to
    pub table: String,
    /// Row after the change (absent for deletes); may be partial
    #[serde(default)]
    pub new: Option<Value>,
    /// Row before the change, when the channel provides it
    #[serde(default)]
    pub old: Option<Value>,
}

impl ChangeEvent {
    /// String field of the post-change row
    #[must_use]
    pub fn new_str(&self, field: &str) -> Option<&str> {
        self.new.as_ref()?.get(field)?.as_str()
    }
}

/// Stream of change notifications
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent, ChangeFeedError>> + Send>>;

/// Trait for change-notification channels.
///
/// Dropping the returned stream ends the subscription.
pub trait ChangeFeed: Send + Sync {
    /// Subscribe to changes on a table.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeFeedError::SubscriptionFailed`] if the channel refuses
    /// the subscription.
    fn subscribe(
        &self,
        scope: &TableScope,
        filter: EventTypeFilter,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, ChangeFeedError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_notification_payload() {
        let change: ChangeEvent = serde_json::from_value(json!({
            "type": "UPDATE",
            "table": "event_applications",
            "new": { "id": "app-1", "event_id": "event-1", "provider_id": "p1", "status": "accepted" },
            "old": null
        }))
        .unwrap();

        assert_eq!(change.kind, ChangeKind::Update);
        assert!(TableScope::applications().contains(&change));
        assert_eq!(change.new_str("provider_id"), Some("p1"));
        assert_eq!(change.new_str("missing"), None);
    }

    #[test]
    fn new_str_ignores_non_string_fields() {
        let change = ChangeEvent {
            kind: ChangeKind::Insert,
            table: APPLICATIONS_TABLE.to_string(),
            new: Some(json!({ "event_id": 12 })),
            old: None,
        };
        assert_eq!(change.new_str("event_id"), None);

        let deleted = ChangeEvent {
            kind: ChangeKind::Delete,
            table: APPLICATIONS_TABLE.to_string(),
            new: None,
            old: Some(json!({ "id": "app-1" })),
        };
        assert_eq!(deleted.new_str("id"), None);
    }

    #[test]
    fn event_type_filter() {
        assert!(EventTypeFilter::All.accepts(ChangeKind::Delete));
        let only = EventTypeFilter::Only(vec![ChangeKind::Insert, ChangeKind::Update]);
        assert!(only.accepts(ChangeKind::Update));
        assert!(!only.accepts(ChangeKind::Delete));
    }
}
