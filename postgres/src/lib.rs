//! `PostgreSQL` collaborators for the gigmarket application lifecycle.
//!
//! This crate provides the production implementations of the two store-side
//! contracts from `gigmarket-core`:
//!
//! - [`PostgresApplicationStore`]: [`ApplicationStatusStore`](gigmarket_core::store::ApplicationStatusStore)
//!   over runtime-built `sqlx` queries
//! - [`PostgresChangeFeed`]: [`ChangeFeed`](gigmarket_core::change_feed::ChangeFeed)
//!   over `LISTEN`/`NOTIFY`, fed by the trigger installed by [`migrate`]
//!
//! # Example
//!
//! ```ignore
//! use gigmarket_postgres::{PostgresApplicationStore, PostgresChangeFeed, PostgresConfig};
//!
//! let config = PostgresConfig::from_env()?;
//! let pool = gigmarket_postgres::connect(&config).await?;
//! gigmarket_postgres::migrate(&pool).await?;
//!
//! let store = PostgresApplicationStore::new(pool.clone());
//! let feed = PostgresChangeFeed::new(pool);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Connection settings
pub mod config;

/// Notification-backed change feed
pub mod listener;

/// Application store
pub mod store;

pub use config::{ConfigError, PostgresConfig};
pub use listener::{NOTIFY_CHANNEL, PostgresChangeFeed, decode_notification};
pub use store::{PostgresApplicationStore, map_sqlx_error};

use gigmarket_core::store::StoreError;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Open a connection pool with the configured limits.
///
/// # Errors
///
/// Returns [`StoreError::Connection`] if the database cannot be reached.
pub async fn connect(config: &PostgresConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .connect(&config.database_url)
        .await
        .map_err(|e| StoreError::Connection(format!("Failed to connect: {e}")))?;

    tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Create the lifecycle tables and the change-notify trigger.
///
/// # Errors
///
/// Returns [`StoreError::Query`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::query(format!("Migration failed: {e}")))?;
    Ok(())
}
