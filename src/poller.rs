//! Fixed-cadence polling of small JSON resources.
//!
//! A [`Poller`] owns one background task that fetches a resource every tick
//! and publishes the last successful payload. Failures are logged and retried
//! on the next tick; there is no backoff.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::DashResult;

/// Handle to a recurring fetch. Dropping it stops the task.
#[derive(Debug)]
pub struct Poller<T> {
    resource: &'static str,
    latest: watch::Receiver<Option<T>>,
    enabled: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl<T> Poller<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Start polling `resource` every `interval`. The first fetch happens
    /// immediately.
    pub fn spawn<F, Fut>(resource: &'static str, interval: Duration, fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = DashResult<T>> + Send + 'static,
    {
        let (latest_tx, latest) = watch::channel(None);
        let (enabled, enabled_rx) = watch::channel(true);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !*enabled_rx.borrow() {
                    continue;
                }

                match fetch().await {
                    Ok(value) => {
                        if latest_tx.send(Some(value)).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.is_transient() => {
                        debug!(resource, error = %e, "poll failed, retrying next tick");
                    }
                    Err(e) => {
                        warn!(resource, error = %e, "poll failed, retrying next tick");
                    }
                }
            }
        });

        Self {
            resource,
            latest,
            enabled,
            task,
        }
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    /// Last successfully fetched value
    pub fn latest(&self) -> Option<T> {
        self.latest.borrow().clone()
    }

    /// Receiver that observes every successful fetch
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.latest.clone()
    }

    /// Wait for the next successful fetch. Returns `None` once the task is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.latest.changed().await.ok()?;
        self.latest.borrow_and_update().clone()
    }

    /// Pause or resume fetching. Ticks keep running while paused.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.send_replace(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }
}

impl<T> Drop for Poller<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DashError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(calls: Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<DashResult<usize>> + Send + 'static {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok(n))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_fixed_cadence() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut poller = Poller::spawn("status.json", Duration::from_millis(2000), counting(calls.clone()));

        assert_eq!(poller.changed().await, Some(1));
        assert_eq!(poller.changed().await, Some(2));
        assert_eq!(poller.latest(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut poller = Poller::spawn("settings.json", Duration::from_millis(100), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 2 {
                    Err(DashError::ConnectionLost("reset".into()))
                } else {
                    Ok(n)
                }
            }
        });

        assert_eq!(poller.changed().await, Some(1));
        // the failed second fetch publishes nothing; the third succeeds
        assert_eq!(poller.changed().await, Some(3));
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_poller_does_not_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut poller = Poller::spawn("status.json", Duration::from_millis(100), counting(calls.clone()));
        assert_eq!(poller.changed().await, Some(1));

        poller.set_enabled(false);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        poller.set_enabled(true);
        assert_eq!(poller.changed().await, Some(2));
    }
}
