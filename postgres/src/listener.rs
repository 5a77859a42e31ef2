//! `LISTEN`-based [`ChangeFeed`].
//!
//! The notify trigger installed by [`migrate`](crate::migrate) publishes every
//! application row change on [`NOTIFY_CHANNEL`] as a JSON document
//! `{ "type", "table", "new", "old" }`. Each subscription opens its
//! own listener connection; table scope and change kind are checked on the
//! decoded payload, and row-level filtering is left to the subscriber.

use gigmarket_core::change_feed::{
    ChangeEvent, ChangeFeed, ChangeFeedError, ChangeStream, EventTypeFilter, TableScope,
};
use sqlx::postgres::{PgListener, PgPool};
use std::future::Future;
use std::pin::Pin;

/// Channel the notify trigger publishes on; fixed by the migration
pub const NOTIFY_CHANNEL: &str = "event_applications_changes";

/// Decode a trigger notification payload.
///
/// # Errors
///
/// Returns [`ChangeFeedError::Malformed`] if the payload is not a change document.
pub fn decode_notification(payload: &str) -> Result<ChangeEvent, ChangeFeedError> {
    serde_json::from_str(payload).map_err(|e| ChangeFeedError::Malformed(e.to_string()))
}

/// Change feed over `PostgreSQL` notifications
#[derive(Clone, Debug)]
pub struct PostgresChangeFeed {
    pool: PgPool,
}

impl PostgresChangeFeed {
    /// Listen for application changes using connections from `pool`
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ChangeFeed for PostgresChangeFeed {
    fn subscribe(
        &self,
        scope: &TableScope,
        filter: EventTypeFilter,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, ChangeFeedError>> + Send + '_>> {
        let scope = scope.clone();
        Box::pin(async move {
            let mut listener = PgListener::connect_with(&self.pool)
                .await
                .map_err(|e| ChangeFeedError::ConnectionFailed(e.to_string()))?;
            listener
                .listen(NOTIFY_CHANNEL)
                .await
                .map_err(|e| ChangeFeedError::SubscriptionFailed {
                    table: scope.table.clone(),
                    reason: e.to_string(),
                })?;

            tracing::info!(channel = NOTIFY_CHANNEL, table = %scope.table, "Listening for changes");

            let stream = async_stream::stream! {
                loop {
                    let notification = match listener.recv().await {
                        Ok(notification) => notification,
                        Err(e) => {
                            tracing::warn!(error = %e, "Notification listener failed");
                            yield Err(ChangeFeedError::ConnectionFailed(e.to_string()));
                            break;
                        }
                    };

                    match decode_notification(notification.payload()) {
                        Ok(change) if scope.contains(&change) && filter.accepts(change.kind) => {
                            metrics::counter!("applications_store_notifications_total", "outcome" => "delivered")
                                .increment(1);
                            yield Ok(change);
                        }
                        Ok(_) => {
                            metrics::counter!("applications_store_notifications_total", "outcome" => "filtered")
                                .increment(1);
                        }
                        Err(e) => {
                            metrics::counter!("applications_store_notifications_total", "outcome" => "malformed")
                                .increment(1);
                            yield Err(e);
                        }
                    }
                }
            };

            Ok(Box::pin(stream) as ChangeStream)
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use gigmarket_core::change_feed::ChangeKind;

    #[test]
    fn decodes_trigger_payload() {
        let payload = r#"{
            "type": "UPDATE",
            "table": "event_applications",
            "new": {"id": "a", "event_id": "e", "provider_id": "p", "status": "accepted"},
            "old": {"id": "a", "event_id": "e", "provider_id": "p", "status": "pending"}
        }"#;

        let change = decode_notification(payload).unwrap();
        assert_eq!(change.kind, ChangeKind::Update);
        assert_eq!(change.new_str("status"), Some("accepted"));
        assert!(TableScope::applications().contains(&change));
    }

    #[test]
    fn delete_payload_has_no_new_row() {
        let payload = r#"{"type": "DELETE", "table": "event_applications", "new": null, "old": {"id": "a"}}"#;
        let change = decode_notification(payload).unwrap();
        assert_eq!(change.kind, ChangeKind::Delete);
        assert!(change.new.is_none());
    }

    #[test]
    fn migration_notifies_on_the_listened_channel() {
        let trigger = include_str!("../migrations/0002_application_change_notify.sql");
        assert!(trigger.contains(&format!("'{NOTIFY_CHANNEL}'")));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            decode_notification("not json"),
            Err(ChangeFeedError::Malformed(_))
        ));
        assert!(matches!(
            decode_notification(r#"{"type": "TRUNCATE", "table": "event_applications"}"#),
            Err(ChangeFeedError::Malformed(_))
        ));
    }
}
