//! Event applications and their status lifecycle.
//!
//! An application is a provider's request to service an event. Its status
//! starts at `pending` and moves exactly once to `accepted` or `rejected`;
//! terminal statuses never go back to `pending`.
//!
//! The store hands back [`ApplicationRow`] values whose provider join is an
//! untyped JSON value. Converting a row into an [`EventApplication`] validates
//! that join and drops it (rather than failing) when it is malformed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier without validation
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the identifier is empty or whitespace only
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of an [`EventApplication`]
    ApplicationId
);

string_id!(
    /// Identifier of an [`Event`](crate::event::Event)
    EventId
);

string_id!(
    /// Identifier of a user; providers and contractors share this id space
    UserId
);

/// Status of an application
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    /// Awaiting the event owner's decision
    Pending,
    /// Accepted by the event owner
    Accepted,
    /// Rejected by the event owner
    Rejected,
}

impl ApplicationStatus {
    /// Accepted and rejected are terminal
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected)
    }

    /// Position in the lifecycle; a status never moves to a lower rank
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Accepted | Self::Rejected => 1,
        }
    }

    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown application status '{other}'")),
        }
    }
}

/// An owner's decision on a pending application
///
/// These are the only legal transition targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    /// Move the application to `accepted`
    Accept,
    /// Move the application to `rejected`
    Reject,
}

impl Decision {
    /// The status this decision writes
    #[must_use]
    pub const fn target_status(self) -> ApplicationStatus {
        match self {
            Self::Accept => ApplicationStatus::Accepted,
            Self::Reject => ApplicationStatus::Rejected,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("accept"),
            Self::Reject => f.write_str("reject"),
        }
    }
}

/// Read-only projection of the provider's profile joined onto an application
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSummary {
    /// Provider user id
    pub id: UserId,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Avatar image location, if the profile has one
    pub avatar_url: Option<String>,
}

impl ProviderSummary {
    /// Validate an untyped join value.
    ///
    /// Accepts an object, or a single-element array wrapping one, whose `id`,
    /// `first_name` and `last_name` are strings and whose `avatar_url` is a
    /// string, null or absent. Returns `None` for anything else.
    #[must_use]
    pub fn from_join(value: &Value) -> Option<Self> {
        let object = match value {
            Value::Object(map) => map,
            Value::Array(items) if items.len() == 1 => items[0].as_object()?,
            _ => return None,
        };

        let string_field = |key: &str| object.get(key)?.as_str().map(str::to_string);

        let avatar_url = match object.get("avatar_url") {
            None | Some(Value::Null) => None,
            Some(Value::String(url)) => Some(url.clone()),
            Some(_) => return None,
        };

        Some(Self {
            id: UserId::new(string_field("id")?),
            first_name: string_field("first_name")?,
            last_name: string_field("last_name")?,
            avatar_url,
        })
    }

    /// "First Last"
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A row of the applications table as the store returns it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRow {
    /// Application id
    pub id: ApplicationId,
    /// Parent event
    pub event_id: EventId,
    /// Applying provider
    pub provider_id: UserId,
    /// Service category applied for
    pub service_category: String,
    /// Free-text message to the event owner
    pub message: String,
    /// Current status
    pub status: ApplicationStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Raw provider join; only present for enriched selects
    #[serde(default)]
    pub provider: Option<Value>,
}

/// An application as presented to the rest of the lifecycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventApplication {
    /// Application id
    pub id: ApplicationId,
    /// Parent event
    pub event_id: EventId,
    /// Applying provider
    pub provider_id: UserId,
    /// Service category applied for
    pub service_category: String,
    /// Free-text message to the event owner
    pub message: String,
    /// Current status
    pub status: ApplicationStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Validated provider join; `None` when absent or malformed
    pub provider: Option<ProviderSummary>,
}

impl EventApplication {
    /// Copy of this record carrying a different status
    #[must_use]
    pub fn with_status(&self, status: ApplicationStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

impl From<ApplicationRow> for EventApplication {
    fn from(row: ApplicationRow) -> Self {
        let provider = row.provider.as_ref().and_then(|join| {
            let summary = ProviderSummary::from_join(join);
            if summary.is_none() {
                tracing::debug!(
                    application_id = %row.id,
                    "Discarding malformed provider join"
                );
            }
            summary
        });

        Self {
            id: row.id,
            event_id: row.event_id,
            provider_id: row.provider_id,
            service_category: row.service_category,
            message: row.message,
            status: row.status,
            created_at: row.created_at,
            provider,
        }
    }
}

/// Insert payload for a new application; the store assigns the id
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApplication {
    /// Event applied to
    pub event_id: EventId,
    /// Applying provider
    pub provider_id: UserId,
    /// Service category applied for
    pub service_category: String,
    /// Free-text message to the event owner
    pub message: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl NewApplication {
    /// New applications always start pending
    #[must_use]
    pub const fn status(&self) -> ApplicationStatus {
        ApplicationStatus::Pending
    }
}
