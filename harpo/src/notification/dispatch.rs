//! Fire-and-forget notification fan-out.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::debug;

use super::{Message, NotificationProvider};
use crate::provider::Bound;

/// Sends messages to many providers concurrently.
///
/// Each delivery runs on its own detached task. Failures are logged at debug
/// level and never reach the caller. Cloning shares the same task group.
#[derive(Clone, Default)]
pub struct Dispatcher {
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch a copy of `message` to every provider and return immediately.
    pub fn notify(&self, message: &Message, providers: &[Bound<dyn NotificationProvider>]) {
        for bound in providers {
            let message = message.clone();
            let name = bound.name.clone();
            let provider = Arc::clone(&bound.provider);

            self.tracker.spawn(async move {
                if let Err(e) = provider.send(&message).await {
                    debug!(
                        notifier = %name,
                        kind = provider.kind(),
                        subject = %message.subject,
                        error = %e,
                        "Failed to deliver notification"
                    );
                }
            });
        }
    }

    /// Number of deliveries still in flight.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every delivery dispatched so far.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::MessageLevel;
    use crate::test_utils::{FailingNotifier, RecordingNotifier};

    #[tokio::test]
    async fn test_notify_reaches_every_provider_despite_failures() {
        let first = Arc::new(RecordingNotifier::default());
        let second = Arc::new(RecordingNotifier::default());
        let providers: Vec<Bound<dyn NotificationProvider>> = vec![
            Bound::new("first", first.clone() as Arc<dyn NotificationProvider>),
            Bound::new("broken", Arc::new(FailingNotifier) as Arc<dyn NotificationProvider>),
            Bound::new("second", second.clone() as Arc<dyn NotificationProvider>),
        ];

        let dispatcher = Dispatcher::new();
        let message = Message::new("Harpo Backup", MessageLevel::Info, vec!["docs".into()], "hi");
        dispatcher.notify(&message, &providers);
        dispatcher.flush().await;

        assert_eq!(first.subjects(), vec!["hi"]);
        assert_eq!(second.subjects(), vec!["hi"]);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_flush_allows_further_dispatch() {
        let recorder = Arc::new(RecordingNotifier::default());
        let providers = vec![Bound::new(
            "rec",
            recorder.clone() as Arc<dyn NotificationProvider>,
        )];
        let dispatcher = Dispatcher::new();

        let message = Message::new("e", MessageLevel::Info, vec!["x".into()], "one");
        dispatcher.notify(&message, &providers);
        dispatcher.flush().await;

        let message = Message::new("e", MessageLevel::Info, vec!["x".into()], "two");
        dispatcher.notify(&message, &providers);
        dispatcher.flush().await;

        assert_eq!(recorder.subjects(), vec!["one", "two"]);
    }
}
