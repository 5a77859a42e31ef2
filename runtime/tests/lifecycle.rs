//! End-to-end lifecycle tests over the in-memory store and change feed.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use gigmarket_core::application::{ApplicationId, ApplicationStatus, EventId, UserId};
use gigmarket_core::change_feed::{APPLICATIONS_TABLE, ChangeEvent, ChangeFeedError, ChangeKind};
use gigmarket_core::error::ApplicationError;
use gigmarket_core::event::EventStatus;
use gigmarket_core::store::StoreError;
use gigmarket_runtime::{GuardOutcome, ListAction, MarketplaceClient, TrackerPhase, TransitionOutcome, UnverifiedReason};
use gigmarket_testing::{InMemoryApplicationStore, InMemoryChangeFeed, StaticAuth, fixtures, init_test_tracing, test_clock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

const WAIT: Duration = Duration::from_secs(2);

struct World {
    store: InMemoryApplicationStore,
    feed: InMemoryChangeFeed,
}

impl World {
    fn new() -> Self {
        Self::with_feed(InMemoryChangeFeed::new())
    }

    fn with_feed(feed: InMemoryChangeFeed) -> Self {
        init_test_tracing();
        let store = InMemoryApplicationStore::new();
        store.connect_feed(&feed);
        store.seed_event(fixtures::event("event-1", "owner-1", EventStatus::Published));
        Self { store, feed }
    }

    fn client_for(&self, user: &str) -> MarketplaceClient {
        MarketplaceClient::new(
            Arc::new(self.store.clone()),
            Arc::new(self.feed.clone()),
            Arc::new(StaticAuth::signed_in(user)),
            Arc::new(test_clock()),
        )
    }
}

fn id(value: &str) -> ApplicationId {
    ApplicationId::new(value)
}

fn event_one() -> EventId {
    EventId::new("event-1")
}

#[tokio::test]
async fn simultaneous_approvals_write_once() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    world.store.set_latency(Duration::from_millis(20));
    let owner = world.client_for("owner-1");

    let provider = UserId::new("p1");
    let (id_a1, id_a2) = (id("a"), id("a"));
    let (first, second) = tokio::join!(
        owner.approve_application(&id_a1, &provider),
        owner.approve_application(&id_a2, &provider),
    );

    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_skipped()).count(), 1);
    assert_eq!(world.store.update_count(), 1);
}

#[tokio::test]
async fn simultaneous_view_approvals_write_once() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    let owner = world.client_for("owner-1");
    let view = owner.applications_for_event(&event_one());
    view.refresh().await;
    world.store.set_latency(Duration::from_millis(20));

    let provider = UserId::new("p1");
    let (id_a1, id_a2) = (id("a"), id("a"));
    let (first, second) = tokio::join!(view.approve(&id_a1, &provider), view.approve(&id_a2, &provider));

    assert!(first.unwrap().ran().is_some());
    assert_eq!(second.unwrap(), GuardOutcome::AlreadyInProgress);
    assert_eq!(world.store.update_count(), 1);
    assert!(!view.snapshot().await.is_processing(&id("a")));
}

#[tokio::test]
async fn confirmed_write_survives_stale_snapshots() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    let owner = world.client_for("owner-1");
    let view = owner.applications_for_event(&event_one());
    view.refresh().await;
    let issued_before_write = view.store().state(|state| state.revision).await;

    assert_ok!(view.approve(&id("a"), &UserId::new("p1")).await);

    // A refresh issued before the write completes afterwards
    let _ = view
        .store()
        .send(ListAction::SnapshotLoaded {
            issued_at: issued_before_write,
            applications: vec![fixtures::application("a", ApplicationStatus::Pending)],
        })
        .await;
    // A lagging read issued after the write
    view.apply_snapshot(vec![fixtures::application("a", ApplicationStatus::Pending)])
        .await;

    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.applications.len(), 1);
    assert_eq!(
        snapshot.application(&id("a")).unwrap().status,
        ApplicationStatus::Accepted
    );
}

#[tokio::test]
async fn unchanged_refresh_keeps_list_identity() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    world.store.seed_row(fixtures::pending_row("b", "event-1", "p2"));
    let view = world.client_for("owner-1").applications_for_event(&event_one());

    view.refresh().await;
    let first = view.snapshot().await.applications;
    view.refresh().await;
    let second = view.snapshot().await.applications;

    assert_eq!(first.len(), 2);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn failed_refresh_keeps_the_list() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    let view = world.client_for("owner-1").applications_for_event(&event_one());
    view.refresh().await;

    world.store.fail_next_fetches(1, &StoreError::Connection("reset".to_string()));
    view.refresh().await;

    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.applications.len(), 1);
    assert!(!snapshot.loading);
    assert!(snapshot.last_error.unwrap().contains("reset"));
}

#[tokio::test]
async fn failed_tracker_read_fails_open() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    world.store.fail_next_fetches(1, &StoreError::Connection("timeout".to_string()));
    let provider = world.client_for("p1");

    let tracker = provider.my_application(&event_one()).await;
    assert_ok!(tracker.wait_until_loaded(WAIT).await);

    let status = tracker.status().await;
    assert!(!status.has_applied);
    assert!(!status.loading);
    assert!(status.application.is_none());
}

#[tokio::test]
async fn unverified_write_is_flagged_and_shown_optimistically() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    let view = world.client_for("owner-1").applications_for_event(&event_one());
    view.refresh().await;

    world.store.intercept_updates(true);
    let outcome = view
        .approve(&id("a"), &UserId::new("p1"))
        .await
        .unwrap()
        .ran()
        .unwrap();

    assert!(outcome.is_simulated());
    assert!(matches!(
        outcome,
        TransitionOutcome::Unverified {
            reason: UnverifiedReason::StatusMismatch,
            ..
        }
    ));
    assert_eq!(outcome.record().status, ApplicationStatus::Accepted);
    assert_eq!(
        view.snapshot().await.application(&id("a")).unwrap().status,
        ApplicationStatus::Accepted
    );

    // The next pass corrects the optimistic status
    world.store.intercept_updates(false);
    view.refresh().await;
    assert_eq!(
        view.snapshot().await.application(&id("a")).unwrap().status,
        ApplicationStatus::Pending
    );
}

#[tokio::test]
async fn apply_approve_and_observe_end_to_end() {
    let world = World::new();
    let owner = world.client_for("owner-1");
    let provider_client = world.client_for("p1");
    let provider = UserId::new("p1");

    let tracker = provider_client.my_application(&event_one()).await;
    assert_ok!(tracker.wait_until_loaded(WAIT).await);
    assert!(!tracker.status().await.has_applied);

    let created = tracker.apply("Buffet", "Happy to cover the whole evening").await.unwrap();
    assert_eq!(created.status, ApplicationStatus::Pending);
    assert!(tracker.status().await.has_applied);

    let view = owner.applications_for_event(&event_one());
    view.refresh().await;
    assert!(view.can_act_on(&created.id).await);

    let outcome = view.approve(&created.id, &provider).await.unwrap().ran().unwrap();
    assert!(matches!(outcome, TransitionOutcome::Verified(_)));

    view.refresh().await;
    let snapshot = view.snapshot().await;
    let mine: Vec<_> = snapshot
        .applications
        .iter()
        .filter(|record| record.provider_id == provider)
        .collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].status, ApplicationStatus::Accepted);
    assert!(!view.can_act_on(&created.id).await);

    // The provider's tracker picks the decision up from the change feed
    assert_ok!(
        tracker
            .store()
            .wait_for(
                |state| state
                    .application()
                    .is_some_and(|record| record.status == ApplicationStatus::Accepted),
                WAIT,
            )
            .await
    );
}

#[tokio::test]
async fn closed_event_gates_the_view_but_not_the_service() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    world.store.set_event_status(&event_one(), EventStatus::Closed);
    let owner = world.client_for("owner-1");

    let view = owner.applications_for_event(&event_one());
    view.refresh().await;
    let snapshot = view.snapshot().await;
    assert_eq!(snapshot.event_status, Some(EventStatus::Closed));
    assert!(!snapshot.actions_allowed());
    assert!(!view.can_act_on(&id("a")).await);

    // Invoked directly, the service still performs the write
    let outcome = owner
        .transitions()
        .transition(&id("a"), gigmarket_core::application::Decision::Accept)
        .await
        .unwrap();
    assert!(matches!(outcome, TransitionOutcome::Verified(_)));
    assert_eq!(world.store.row(&id("a")).unwrap().status, ApplicationStatus::Accepted);
}

#[tokio::test]
async fn unrelated_push_events_are_discarded() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("other", "event-1", "p2"));
    world.store.seed_row(fixtures::pending_row("elsewhere", "event-2", "p1"));
    let tracker = world.client_for("p1").my_application(&event_one()).await;
    assert_ok!(tracker.wait_until_loaded(WAIT).await);

    world.store.set_status_directly(&id("other"), ApplicationStatus::Accepted);
    world.store.set_status_directly(&id("elsewhere"), ApplicationStatus::Rejected);

    assert_ok!(tracker.store().wait_for(|state| state.discarded == 2, WAIT).await);
    assert_eq!(tracker.store().state(|state| state.phase.clone()).await, TrackerPhase::Absent);
}

#[tokio::test]
async fn push_without_id_refetches_by_pair() {
    let world = World::new();
    world.store.silence_notifications(true);
    world.store.seed_row(fixtures::row("a", "event-1", "p1", ApplicationStatus::Accepted));
    world.store.fail_next_fetches(1, &StoreError::Connection("flaky".to_string()));
    let tracker = world.client_for("p1").my_application(&event_one()).await;
    assert_ok!(tracker.wait_until_loaded(WAIT).await);
    assert!(!tracker.status().await.has_applied);

    world.feed.publish(ChangeEvent {
        kind: ChangeKind::Update,
        table: APPLICATIONS_TABLE.to_string(),
        new: Some(json!({ "event_id": "event-1", "provider_id": "p1" })),
        old: None,
    });

    assert_ok!(tracker.store().wait_for(|state| state.has_applied(), WAIT).await);
}

#[tokio::test]
async fn lagging_feed_resyncs_the_tracker() {
    let world = World::with_feed(InMemoryChangeFeed::with_capacity(2));
    world.store.seed_row(fixtures::pending_row("mine", "event-1", "p1"));
    for other in ["o1", "o2", "o3", "o4", "o5"] {
        world.store.seed_row(fixtures::pending_row(other, "event-1", "p2"));
    }
    let tracker = world.client_for("p1").my_application(&event_one()).await;
    assert_ok!(tracker.wait_until_loaded(WAIT).await);
    assert!(tracker.status().await.has_applied);

    // One burst overflows the buffer and drops the change to "mine"
    world.store.set_status_directly(&id("mine"), ApplicationStatus::Accepted);
    for other in ["o1", "o2", "o3", "o4", "o5"] {
        world.store.set_status_directly(&id(other), ApplicationStatus::Rejected);
    }

    assert_ok!(
        tracker
            .store()
            .wait_for(
                |state| state
                    .application()
                    .is_some_and(|application| application.status == ApplicationStatus::Accepted),
                WAIT,
            )
            .await
    );
}

#[tokio::test]
async fn unsubscribe_releases_the_channel() {
    let world = World::new();
    let mut tracker = world.client_for("p1").my_application(&event_one()).await;
    assert_eq!(world.feed.subscriber_count(), 1);
    assert!(tracker.is_subscribed());

    tracker.unsubscribe();
    assert!(!tracker.is_subscribed());

    for _ in 0..100 {
        if world.feed.subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(world.feed.subscriber_count(), 0);
}

#[tokio::test]
async fn dropping_the_tracker_releases_the_channel() {
    let world = World::new();
    let tracker = world.client_for("p1").my_application(&event_one()).await;
    assert_eq!(world.feed.subscriber_count(), 1);

    drop(tracker);

    for _ in 0..100 {
        if world.feed.subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(world.feed.subscriber_count(), 0);
}

#[tokio::test]
async fn tracker_works_without_live_updates() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    world.feed.fail_next_subscribe(ChangeFeedError::ConnectionFailed("offline".to_string()));

    let tracker = world.client_for("p1").my_application(&event_one()).await;
    assert!(!tracker.is_subscribed());
    assert_ok!(tracker.wait_until_loaded(WAIT).await);
    assert!(tracker.status().await.has_applied);
}

#[tokio::test]
async fn permission_failure_is_distinct_from_generic_failure() {
    let world = World::new();
    world.store.seed_row(fixtures::pending_row("a", "event-1", "p1"));
    let owner = world.client_for("owner-1");

    world.store.fail_updates(StoreError::Query {
        code: Some("42501".to_string()),
        message: "new row violates row-level security policy".to_string(),
    });
    let err = owner.approve_application(&id("a"), &UserId::new("p1")).await.unwrap_err();
    assert!(matches!(err, ApplicationError::PermissionDenied(_)));
    assert!(!err.is_retryable());

    world.store.fail_updates(StoreError::Connection("reset by peer".to_string()));
    let err = owner.approve_application(&id("a"), &UserId::new("p1")).await.unwrap_err();
    assert!(matches!(err, ApplicationError::TransitionFailed(_)));
    assert!(err.is_retryable());

    // The lock was released both times
    world.store.clear_faults();
    let outcome = owner.approve_application(&id("a"), &UserId::new("p1")).await.unwrap();
    assert!(!outcome.is_skipped());
}
