//! Fixture builders for rows, events and provider joins.

use crate::mocks::test_clock;
use gigmarket_core::application::{
    ApplicationId, ApplicationRow, ApplicationStatus, EventApplication, EventId, ProviderSummary,
    UserId,
};
use gigmarket_core::change_feed::{APPLICATIONS_TABLE, ChangeEvent, ChangeKind};
use gigmarket_core::environment::Clock;
use gigmarket_core::event::{Event, EventStatus, ServiceRequest};
use serde_json::{Value, json};

/// Application row with the given status and no join
#[must_use]
pub fn row(id: &str, event_id: &str, provider_id: &str, status: ApplicationStatus) -> ApplicationRow {
    ApplicationRow {
        id: ApplicationId::new(id),
        event_id: EventId::new(event_id),
        provider_id: UserId::new(provider_id),
        service_category: "Buffet".to_string(),
        message: format!("{provider_id} would like to help"),
        status,
        created_at: test_clock().now(),
        provider: None,
    }
}

/// Pending application row
#[must_use]
pub fn pending_row(id: &str, event_id: &str, provider_id: &str) -> ApplicationRow {
    row(id, event_id, provider_id, ApplicationStatus::Pending)
}

/// Mapped application with the given status
#[must_use]
pub fn application(id: &str, status: ApplicationStatus) -> EventApplication {
    EventApplication::from(row(id, "event-1", &format!("provider-{id}"), status))
}

/// Published event owned by `contractor_id` with one "Buffet" request
#[must_use]
pub fn event(id: &str, contractor_id: &str, status: EventStatus) -> Event {
    Event {
        id: EventId::new(id),
        contractor_id: UserId::new(contractor_id),
        status,
        service_requests: vec![ServiceRequest {
            category: "Buffet".to_string(),
            required_count: 2,
            filled_count: 0,
        }],
    }
}

/// Well-formed provider summary
#[must_use]
pub fn provider(id: &str, first_name: &str, last_name: &str) -> ProviderSummary {
    ProviderSummary {
        id: UserId::new(id),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        avatar_url: None,
    }
}

/// Provider summary as the join column carries it
#[must_use]
pub fn provider_join(summary: &ProviderSummary) -> Value {
    json!({
        "id": summary.id.as_str(),
        "first_name": summary.first_name,
        "last_name": summary.last_name,
        "avatar_url": summary.avatar_url,
    })
}

/// Push payload for a row change on the applications table
#[must_use]
pub fn application_change(kind: ChangeKind, row: &ApplicationRow) -> ChangeEvent {
    ChangeEvent {
        kind,
        table: APPLICATIONS_TABLE.to_string(),
        new: Some(row_payload(row)),
        old: None,
    }
}

/// Partial row payload, the way the push channel delivers it
#[must_use]
pub fn row_payload(row: &ApplicationRow) -> Value {
    json!({
        "id": row.id.as_str(),
        "event_id": row.event_id.as_str(),
        "provider_id": row.provider_id.as_str(),
        "status": row.status.as_str(),
    })
}
