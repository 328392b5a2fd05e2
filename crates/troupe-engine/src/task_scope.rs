//! Per-scenario task group.
//!
//! Every background task of a scenario is spawned into its scope and the
//! whole scope is cancelled as a unit when the scenario is destroyed.

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Default)]
pub struct TaskScope {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a task that stops at its next suspension point once the scope
    /// is cancelled. Spawning into a cancelled scope is a no-op.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            tracing::debug!(target: "troupe::system", task = name, "Scope cancelled, task not spawned");
            return;
        }

        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(target: "troupe::system", task = name, "Task cancelled");
                }
                _ = future => {}
            }
        });
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels every task and waits for them to unwind.
    ///
    /// Must not be awaited from inside a task of the same scope.
    pub async fn cancel_all(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
