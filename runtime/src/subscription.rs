//! Handle for a change-feed consumer task.

use tokio::task::JoinHandle;

/// Owns the task draining a change stream.
///
/// Unsubscribing aborts the task, which drops the stream and ends the
/// channel subscription. Dropping the handle unsubscribes.
#[derive(Debug, Default)]
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a running consumer task
    #[must_use]
    pub const fn active(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// A subscription that never connected
    #[must_use]
    pub const fn inactive() -> Self {
        Self { task: None }
    }

    /// True while the consumer task is running
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop consuming; idempotent
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Change subscription released");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
