//! Shared, single-fire cancellation signal for a query.
//!
//! One [`CancellationHandle`] is created per query and cloned (not copied) into
//! every task working on it: the producer workers and the log mirror listener.
//! Firing any clone is observed by all of them.
//!
//! Cancellation is cooperative. Firing the handle flips a flag that subsequent
//! checks observe and wakes every task parked in [`CancellationHandle::cancelled`];
//! it never interrupts work in progress.
//!
//! # Example
//!
//! ```
//! use querycast_core::cancellation::CancellationHandle;
//!
//! # tokio_test::block_on(async {
//! let handle = CancellationHandle::new();
//! let worker = handle.clone();
//!
//! assert!(handle.cancel());
//! assert!(!handle.cancel()); // single-fire
//!
//! worker.cancelled().await;
//! assert!(worker.is_cancelled());
//! # });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Cloneable handle carrying an explicit cancelled flag and a wake-up channel.
#[derive(Clone)]
pub struct CancellationHandle {
    inner: Arc<Inner>,
}

struct Inner {
    fired: AtomicBool,
    notifier: watch::Sender<bool>,
}

impl CancellationHandle {
    /// Create a handle in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        let (notifier, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                fired: AtomicBool::new(false),
                notifier,
            }),
        }
    }

    /// Fire the handle.
    ///
    /// Returns `true` only for the call that actually performed the cancellation;
    /// later calls are no-ops returning `false`.
    pub fn cancel(&self) -> bool {
        let fired = self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if fired {
            self.inner.notifier.send_replace(true);
        }
        fired
    }

    /// Whether the handle has been fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Wait until the handle is fired. Returns immediately if it already was.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.notifier.subscribe();
        // The flag is re-read after subscribing, so a fire between the two is not lost.
        if self.is_cancelled() {
            return;
        }
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Number of clones currently alive.
    #[must_use]
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationHandle")
            .field("cancelled", &self.is_cancelled())
            .field("holders", &self.holders())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_reaches_every_clone() {
        let handle = CancellationHandle::new();
        let a = handle.clone();
        let b = handle.clone();
        assert_eq!(handle.holders(), 3);

        let waiter_a = tokio::spawn(async move { a.cancelled().await });
        let waiter_b = tokio::spawn(async move { b.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.cancel());

        tokio::time::timeout(Duration::from_secs(1), async {
            waiter_a.await.expect("waiter a panicked");
            waiter_b.await.expect("waiter b panicked");
        })
        .await
        .expect("waiters did not wake");
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn only_first_cancel_fires() {
        let handle = CancellationHandle::new();
        let clone = handle.clone();
        assert!(clone.cancel());
        assert!(!handle.cancel());
        assert!(!clone.cancel());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_fired() {
        let handle = CancellationHandle::new();
        handle.cancel();
        tokio::time::timeout(Duration::from_millis(50), handle.cancelled())
            .await
            .expect("already-fired handle should not block");
    }
}
