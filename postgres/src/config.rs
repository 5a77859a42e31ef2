//! Connection settings.
//!
//! | Variable | Default |
//! |---|---|
//! | `DATABASE_URL` | required |
//! | `DATABASE_MAX_CONNECTIONS` | 10 |
//! | `DATABASE_MIN_CONNECTIONS` | 0 |
//! | `DATABASE_CONNECT_TIMEOUT_SECS` | 5 |

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable was not set
    #[error("Missing required variable {0}")]
    Missing(&'static str),

    /// A variable was set to an unusable value
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Value found
        value: String,
        /// What was wrong with it
        reason: String,
    },
}

/// `PostgreSQL` connection settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Connection string
    pub database_url: String,
    /// Pool upper bound
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
}

impl PostgresConfig {
    /// Settings for `database_url` with every other value defaulted
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] without `DATABASE_URL`, or
    /// [`ConfigError::Invalid`] for a malformed number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] without `DATABASE_URL`, or
    /// [`ConfigError::Invalid`] for a malformed number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let mut config = Self::new(database_url);

        if let Some(value) = parse(&lookup, "DATABASE_MAX_CONNECTIONS")? {
            config.max_connections = value;
        }
        if let Some(value) = parse(&lookup, "DATABASE_MIN_CONNECTIONS")? {
            config.min_connections = value;
        }
        if let Some(secs) = parse::<u64>(&lookup, "DATABASE_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }

        if config.min_connections > config.max_connections {
            return Err(ConfigError::Invalid {
                key: "DATABASE_MIN_CONNECTIONS",
                value: config.min_connections.to_string(),
                reason: format!("exceeds DATABASE_MAX_CONNECTIONS ({})", config.max_connections),
            });
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|value| {
            value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
