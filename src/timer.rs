//! Single-slot cancellable timer
//!
//! Arming always aborts the previously armed task first, so at most one timer
//! per slot is ever live (detail auto-hide, deferred gesture dispatch).

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct CancellableTimer {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl CancellableTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any pending action
    pub fn arm<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });

        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Cancel the pending action; returns true if one was still pending
    pub fn cancel(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.take() {
            Some(task) => {
                let pending = !task.is_finished();
                task.abort();
                pending
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for CancellableTimer {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let timer = CancellableTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        timer.arm(Duration::from_secs(2), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_instead_of_stacking() {
        let timer = CancellableTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let f = fired.clone();
            timer.arm(Duration::from_secs(1), async move {
                f.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let timer = CancellableTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        timer.arm(Duration::from_secs(1), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
