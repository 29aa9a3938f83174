//! Cancellable One-Shot Timers
//!
//! Every time-bounded transition in the server (confirmation expiry,
//! question deadline, start delay, post-match cleanup) is scheduled through
//! [`schedule`], which returns an opaque [`TimerHandle`]. Cancelling a
//! handle is idempotent; cancelling after the timer fired is a no-op.
//!
//! Dropping a handle does NOT cancel the timer. Owners that need
//! cancel-on-cleanup semantics must call [`TimerHandle::cancel`] explicitly.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Handle to a scheduled one-shot timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel the timer. Safe to call more than once, and safe to call
    /// after the timer has already fired.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the timer has fired or been cancelled.
    pub fn is_done(&self) -> bool {
        self.task.is_finished()
    }
}

/// Schedule `action` to run once after `delay`.
///
/// The action runs on the runtime's worker pool; if it needs to mutate
/// match state it should do so by sending a command into the owning actor's
/// channel rather than touching shared state directly.
pub fn schedule<F>(delay: Duration, action: F) -> TimerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        action.await;
    });

    TimerHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_timer_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        schedule(Duration::from_millis(10), async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_prevents_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let handle = schedule(Duration::from_millis(50), async move {
            flag.store(true, Ordering::SeqCst);
        });
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let handle = schedule(Duration::from_millis(20), async {});
        handle.cancel();
        handle.cancel();
        handle.cancel();
    }

    #[tokio::test]
    async fn test_cancel_after_fire_is_noop() {
        let handle = schedule(Duration::from_millis(5), async {});
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(handle.is_done());
        handle.cancel();
    }
}
