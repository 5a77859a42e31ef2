//! In-memory change feed for testing push reconciliation.
//!
//! [`InMemoryChangeFeed`] fans every published [`ChangeEvent`] out to all live
//! subscriptions through a `tokio::sync::broadcast` channel. Table scope and
//! event-type filtering happen per subscription, as they would on a real
//! channel; row-level filtering is left to subscribers.

use gigmarket_core::change_feed::{
    ChangeEvent, ChangeFeed, ChangeFeedError, ChangeStream, EventTypeFilter, TableScope,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Broadcast-backed change feed.
///
/// # Example
///
/// ```
/// use gigmarket_testing::InMemoryChangeFeed;
///
/// let feed = InMemoryChangeFeed::new();
/// assert_eq!(feed.subscriber_count(), 0);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
    subscribe_failure: Arc<Mutex<Option<ChangeFeedError>>>,
}

impl InMemoryChangeFeed {
    /// Create a feed with the default buffer size
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a feed buffering up to `capacity` undelivered notifications
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            subscribe_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Deliver a change to every live subscription.
    ///
    /// Returns the number of subscriptions that received it.
    pub fn publish(&self, change: ChangeEvent) -> usize {
        self.sender.send(change).unwrap_or(0)
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Make the next `subscribe` call fail with `error`
    pub fn fail_next_subscribe(&self, error: ChangeFeedError) {
        *self
            .subscribe_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for InMemoryChangeFeed {
    fn subscribe(
        &self,
        scope: &TableScope,
        filter: EventTypeFilter,
    ) -> Pin<Box<dyn Future<Output = Result<ChangeStream, ChangeFeedError>> + Send + '_>> {
        let scope = scope.clone();
        Box::pin(async move {
            if let Some(error) = self
                .subscribe_failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
            {
                return Err(error);
            }

            // Subscribe before returning so nothing published afterwards is missed
            let mut receiver = self.sender.subscribe();

            let stream = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(change) => {
                            if scope.contains(&change) && filter.accepts(change.kind) {
                                yield Ok(change);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            yield Err(ChangeFeedError::Lagged(skipped));
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };

            Ok(Box::pin(stream) as ChangeStream)
        })
    }
}
