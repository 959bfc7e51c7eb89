// ABOUTME: Tracked background task spawning
// ABOUTME: Counts live session tasks so teardown can prove no timer outlives its session

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Spawns tasks and keeps a count of the ones still alive
///
/// A task counts as live until its future is dropped, which covers both
/// normal completion and abort.
#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    live: Arc<AtomicUsize>,
}

impl TaskTracker {
    /// Create a tracker with no live tasks
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = LiveGuard::new(Arc::clone(&self.live));
        tokio::spawn(async move {
            let _guard = guard;
            future.await
        })
    }

    /// Number of tracked tasks whose futures have not been dropped yet
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self(live)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
