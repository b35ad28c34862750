//! Timed work: a cancellable periodic task, and fire-and-forget
//! one-shot delays used for randomized M-SEARCH replies and scanner
//! timeouts.
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub struct Scheduler {
    cancellation_token: CancellationToken,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Runs `action` every `period` starting 1000ms from now, until
    /// `close()` is called. Spawned onto its own task.
    pub fn spawn_periodic<F, Fut>(&self, period: Duration, mut action: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1000)).await;
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => action().await,
                    _ = token.cancelled() => {
                        tracing::debug!("periodic task cancelled");
                        return;
                    }
                }
            }
        });
    }

    /// Runs `action` once after `delay`. Not cancelled by `close()`:
    /// one-shots are cheap and self-contained, so outstanding ones are
    /// simply left to finish.
    pub fn spawn_once<F, Fut>(&self, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action().await;
        });
    }

    pub fn close(&self) {
        self.cancellation_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn spawn_once_fires_after_delay() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        scheduler.spawn_once(Duration::from_millis(20), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spawn_periodic_ticks_then_stops_on_close() {
        let scheduler = Scheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        scheduler.spawn_periodic(Duration::from_millis(100), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // the first fire is 1000ms after spawn, so nothing should have
        // ticked yet at this point.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(800)).await;
        let before_close = ticks.load(Ordering::SeqCst);
        assert!(before_close >= 1, "expected at least one tick by now");

        scheduler.close();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), before_close, "no further ticks after close");
    }
}
