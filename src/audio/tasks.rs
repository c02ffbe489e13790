use std::future::Future;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, trace};

/// Background work owned by one session (non-blocking enqueues, prefetches,
/// play-path resolutions). Finished tasks drop out on their own; `shutdown`
/// cancels whatever is left and waits for it to unwind.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `work` unless the registry is already shut down.
    pub fn spawn<F>(&self, name: &'static str, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            debug!("Refusing background task '{}' after shutdown", name);
            return false;
        }

        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => debug!("Background task '{}' cancelled", name),
                _ = work => trace!("Background task '{}' finished", name),
            }
        });
        true
    }

    /// Number of tasks still running
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Cancels every task and waits until all of them have stopped.
    pub async fn shutdown(&self) {
        let running = self.tracker.len();
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Background tasks shut down ({} were running)", running);
    }
}
