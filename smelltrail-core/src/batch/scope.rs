use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::config::BatchSection;

/// Scheduling context shared by every coalescer of one logical operation.
///
/// Holds the collection delay, the limit on outstanding bulk calls, and the
/// abort handles of dispatches that must not outlive the operation.
#[derive(Debug, Clone)]
pub struct BatchScope {
    inner: Arc<ScopeInner>,
}

#[derive(Debug)]
struct ScopeInner {
    delay: Duration,
    max_batch_size: usize,
    limiter: Semaphore,
    abortable: Mutex<Vec<AbortHandle>>,
    cancelled: AtomicBool,
}

impl BatchScope {
    pub fn new(config: &BatchSection) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                delay: config.delay(),
                max_batch_size: config.max_batch_size.max(1),
                limiter: Semaphore::new(config.max_concurrent_batches.max(1)),
                abortable: Mutex::new(Vec::new()),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    pub fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size
    }

    /// Bulk-call permits currently free.
    pub fn available_permits(&self) -> usize {
        self.inner.limiter.available_permits()
    }

    /// Wait out the collection window.
    pub(crate) async fn collect_window(&self) {
        if self.inner.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.inner.delay).await;
        }
    }

    /// Reserve one outstanding bulk call. `None` once the scope is cancelled.
    pub(crate) async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.inner.limiter.acquire().await.ok()
    }

    /// Remember a dispatch task that [`cancel`](Self::cancel) must abort.
    pub(crate) fn track(&self, handle: AbortHandle) {
        if self.is_cancelled() {
            handle.abort();
            return;
        }
        let mut handles = self
            .inner
            .abortable
            .lock()
            .expect("batch scope mutex poisoned");
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// End the operation.
    ///
    /// Batches that already hold a permit run to completion and their results
    /// are discarded; batches still waiting for one fail as cancelled; tracked
    /// dispatches (git subprocesses) are aborted.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.limiter.close();
        let handles = std::mem::take(
            &mut *self
                .inner
                .abortable
                .lock()
                .expect("batch scope mutex poisoned"),
        );
        debug!(aborted = handles.len(), "batch scope cancelled");
        for handle in handles {
            handle.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_come_from_config() {
        let scope = BatchScope::new(&BatchSection {
            delay_ms: 5,
            max_batch_size: 7,
            max_concurrent_batches: 3,
            max_concurrent_processes: 1,
        });
        assert_eq!(scope.delay(), Duration::from_millis(5));
        assert_eq!(scope.max_batch_size(), 7);
        assert_eq!(scope.available_permits(), 3);
    }

    #[tokio::test]
    async fn cancel_closes_the_limiter() {
        let scope = BatchScope::new(&BatchSection::default());
        assert!(scope.acquire().await.is_some());
        scope.cancel();
        assert!(scope.is_cancelled());
        assert!(scope.acquire().await.is_none());
    }

    #[tokio::test]
    async fn cancel_aborts_tracked_tasks() {
        let scope = BatchScope::new(&BatchSection::default());
        let task = tokio::spawn(std::future::pending::<()>());
        scope.track(task.abort_handle());
        scope.cancel();
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
