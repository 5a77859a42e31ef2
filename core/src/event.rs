//! Events published by contractors.
//!
//! Events are read-only from the lifecycle's point of view. The one rule that
//! matters here is [`is_action_allowed`]: once an event is closed, its
//! applications can no longer be accepted or rejected from the owner's view.

use crate::application::{EventId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Publication status of an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Not yet visible to providers
    Draft,
    /// Open for applications
    Published,
    /// No longer taking decisions on applications
    Closed,
    /// Took place
    Completed,
    /// Called off
    Cancelled,
}

impl EventStatus {
    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Closed => "closed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "closed" => Ok(Self::Closed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

/// Whether accept/reject actions are offered for an event in this status.
///
/// Advisory: the transition service does not consult it.
#[must_use]
pub const fn is_action_allowed(status: EventStatus) -> bool {
    !matches!(status, EventStatus::Closed)
}

/// A staffing need within an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Service category, e.g. "Buffet"
    pub category: String,
    /// How many providers are wanted
    pub required_count: u32,
    /// How many have been accepted so far
    pub filled_count: u32,
}

impl ServiceRequest {
    /// Open slots left
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.required_count.saturating_sub(self.filled_count)
    }

    /// True once every slot is taken
    #[must_use]
    pub const fn is_filled(&self) -> bool {
        self.filled_count >= self.required_count
    }
}

/// An event owned by a contractor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event id
    pub id: EventId,
    /// Owning contractor
    pub contractor_id: UserId,
    /// Publication status
    pub status: EventStatus,
    /// Staffing needs
    #[serde(default)]
    pub service_requests: Vec<ServiceRequest>,
}

impl Event {
    /// The service request for a category, if the event has one
    #[must_use]
    pub fn service_request(&self, category: &str) -> Option<&ServiceRequest> {
        self.service_requests
            .iter()
            .find(|request| request.category == category)
    }

    /// True if `user` owns this event
    #[must_use]
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.contractor_id == user
    }

    /// Shorthand for [`is_action_allowed`] on this event's status
    #[must_use]
    pub const fn allows_application_actions(&self) -> bool {
        is_action_allowed(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_closed_events_disable_actions() {
        assert!(!is_action_allowed(EventStatus::Closed));
        for status in [
            EventStatus::Draft,
            EventStatus::Published,
            EventStatus::Completed,
            EventStatus::Cancelled,
        ] {
            assert!(is_action_allowed(status), "{status} should allow actions");
        }
    }

    #[test]
    fn service_request_slots() {
        let request = ServiceRequest {
            category: "Buffet".to_string(),
            required_count: 2,
            filled_count: 1,
        };
        assert_eq!(request.remaining(), 1);
        assert!(!request.is_filled());

        let overfilled = ServiceRequest {
            filled_count: 3,
            ..request
        };
        assert_eq!(overfilled.remaining(), 0);
        assert!(overfilled.is_filled());
    }

    #[test]
    fn event_lookups() {
        let event = Event {
            id: EventId::new("event-1"),
            contractor_id: UserId::new("owner"),
            status: EventStatus::Published,
            service_requests: vec![ServiceRequest {
                category: "Buffet".to_string(),
                required_count: 1,
                filled_count: 0,
            }],
        };

        assert!(event.service_request("Buffet").is_some());
        assert!(event.service_request("DJ").is_none());
        assert!(event.is_owned_by(&UserId::new("owner")));
        assert!(event.allows_application_actions());
    }
}
