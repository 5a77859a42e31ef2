//! Client configuration.
//!
//! Loaded from environment variables with defaults:
//!
//! - `GIGMARKET_BROADCAST_CAPACITY`: per-view action broadcast buffer (default 16)
//! - `RUST_LOG`: log filter (default `info`)
//! - `GIGMARKET_METRICS_ADDR`: Prometheus recorder address (unset disables metrics)

use std::net::SocketAddr;
use thiserror::Error;

const DEFAULT_BROADCAST_CAPACITY: usize = 16;
const DEFAULT_LOG_FILTER: &str = "info";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
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

/// Client configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Buffer size of each view's action broadcast
    pub broadcast_capacity: usize,
    /// `tracing` filter directive
    pub log_filter: String,
    /// Where the metrics scrape endpoint should listen
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            metrics_addr: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set but malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let broadcast_capacity = match lookup("GIGMARKET_BROADCAST_CAPACITY") {
            Some(value) => match value.parse::<usize>() {
                Ok(0) => return Err(invalid("GIGMARKET_BROADCAST_CAPACITY", value, "must be at least 1")),
                Ok(capacity) => capacity,
                Err(e) => return Err(invalid("GIGMARKET_BROADCAST_CAPACITY", value, e)),
            },
            None => defaults.broadcast_capacity,
        };

        let metrics_addr = match lookup("GIGMARKET_METRICS_ADDR") {
            Some(value) => match value.parse::<SocketAddr>() {
                Ok(addr) => Some(addr),
                Err(e) => return Err(invalid("GIGMARKET_METRICS_ADDR", value, e)),
            },
            None => None,
        };

        Ok(Self {
            broadcast_capacity,
            log_filter: lookup("RUST_LOG").unwrap_or(defaults.log_filter),
            metrics_addr,
        })
    }
}

fn invalid(key: &'static str, value: String, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        value,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.broadcast_capacity, 16);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn variables_override_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("GIGMARKET_BROADCAST_CAPACITY", "64"),
            ("RUST_LOG", "gigmarket_runtime=debug"),
            ("GIGMARKET_METRICS_ADDR", "127.0.0.1:9090"),
        ]))
        .unwrap();

        assert_eq!(config.broadcast_capacity, 64);
        assert_eq!(config.log_filter, "gigmarket_runtime=debug");
        assert_eq!(config.metrics_addr, Some("127.0.0.1:9090".parse().unwrap()));
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("GIGMARKET_BROADCAST_CAPACITY", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GIGMARKET_BROADCAST_CAPACITY", .. }));

        let err = ClientConfig::from_lookup(lookup(&[("GIGMARKET_BROADCAST_CAPACITY", "0")])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));

        let err = ClientConfig::from_lookup(lookup(&[("GIGMARKET_METRICS_ADDR", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "GIGMARKET_METRICS_ADDR", .. }));
    }
}
