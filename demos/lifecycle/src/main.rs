//! Lifecycle demo: one provider application from apply to accepted.
//!
//! Runs against the in-memory store and change feed, so no database is needed.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run -p gigmarket-lifecycle-demo
//! ```
//!
//! Set `RUST_LOG=debug` to see reducer flow, and `GIGMARKET_METRICS_ADDR` to
//! print the Prometheus exposition at the end.

#![allow(missing_docs)]

use anyhow::Context;
use gigmarket_core::application::{ApplicationStatus, EventId, UserId};
use gigmarket_core::environment::SystemClock;
use gigmarket_core::event::EventStatus;
use gigmarket_runtime::metrics::MetricsServer;
use gigmarket_runtime::{ClientConfig, MarketplaceClient, TrackerState};
use gigmarket_testing::{InMemoryApplicationStore, InMemoryChangeFeed, StaticAuth, fixtures};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ClientConfig::from_env().context("Invalid client configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics = match config.metrics_addr {
        Some(addr) => {
            let mut server = MetricsServer::new(addr);
            server.start().context("Failed to install metrics recorder")?;
            Some(server)
        },
        None => None,
    };

    let store = InMemoryApplicationStore::new();
    let feed = InMemoryChangeFeed::new();
    store.connect_feed(&feed);
    store.seed_event(fixtures::event("event-1", "owner-1", EventStatus::Published));
    store.seed_provider(&fixtures::provider("provider-1", "Paula", "Provider"));

    let client_for = |user: &str| {
        MarketplaceClient::with_config(
            Arc::new(store.clone()),
            Arc::new(feed.clone()),
            Arc::new(StaticAuth::signed_in(user)),
            Arc::new(SystemClock),
            config.clone(),
        )
    };
    let provider = client_for("provider-1");
    let owner = client_for("owner-1");
    let event_id = EventId::new("event-1");

    // Provider side
    let tracker = provider.my_application(&event_id).await;
    tracker.wait_until_loaded(WAIT).await?;
    let application = tracker.apply("Buffet", "Available all weekend").await?;
    tracing::info!(application_id = %application.id, status = %application.status, "Applied");

    // Owner side
    let view = owner.applications_for_event(&event_id);
    view.refresh().await;
    let outcome = view
        .approve(&application.id, &UserId::new("provider-1"))
        .await?
        .ran()
        .context("approval was already in flight")?;
    tracing::info!(outcome = outcome.label(), "Approved");

    view.refresh().await;
    let snapshot = view.snapshot().await;
    for row in snapshot.applications.iter() {
        let name = row
            .provider
            .as_ref()
            .map_or_else(|| row.provider_id.to_string(), |provider| provider.display_name());
        tracing::info!(application_id = %row.id, provider = %name, status = %row.status, "Listed");
    }
    tracing::info!(
        can_act = view.can_act_on(&application.id).await,
        "Further actions on the accepted application"
    );

    tracker
        .store()
        .wait_for(
            |state: &TrackerState| {
                state
                    .application()
                    .is_some_and(|application| application.status == ApplicationStatus::Accepted)
            },
            WAIT,
        )
        .await
        .context("tracker never saw the acceptance")?;
    tracing::info!("Provider tracker observed the acceptance");

    if let Some(rendered) = metrics.as_ref().and_then(MetricsServer::render) {
        println!("{rendered}");
    }

    Ok(())
}
