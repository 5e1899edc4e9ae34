//! Throttled automatic flush.
//!
//! Queuing any non-Flush request arms the timer; queuing a Flush disarms it.
//! Once armed, the timer task waits one interval and then injects a Flush
//! into the request queue, so buffered requests reach the server even when
//! the caller never flushes explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;

use super::PendingCall;
use crate::types::Request;

pub(crate) struct FlushTimer {
    armed: AtomicBool,
    notify: Notify,
    interval: Duration,
}

impl FlushTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            armed: AtomicBool::new(false),
            notify: Notify::new(),
            interval,
        }
    }

    /// Arm the timer. No-op if already armed.
    pub fn set(&self) {
        if !self.armed.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    /// Disarm the timer; a pending tick will not inject a Flush.
    pub fn unset(&self) {
        self.armed.store(false, Ordering::Release);
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Timer task body. Returns when the request queue closes.
    pub async fn run(&self, requests: &mpsc::Sender<PendingCall>) {
        loop {
            self.notify.notified().await;
            tokio::time::sleep(self.interval).await;

            if !self.armed.swap(false, Ordering::AcqRel) {
                continue;
            }

            match requests.try_send(PendingCall::new(Request::flush())) {
                Ok(()) => tracing::trace!("Flush timer injected flush"),
                // Stay armed so buffered requests still go out once the writer catches up.
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("Flush timer deferred, queue full");
                    self.set();
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_armed_timer_injects_one_flush() {
        let timer = Arc::new(FlushTimer::new(Duration::from_millis(5)));
        let (tx, mut rx) = mpsc::channel(8);

        let task = {
            let timer = timer.clone();
            tokio::spawn(async move { timer.run(&tx).await })
        };

        timer.set();
        timer.set();

        let injected = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(injected.request().is_flush());
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());

        task.abort();
    }

    #[tokio::test]
    async fn test_unset_cancels_tick() {
        let timer = Arc::new(FlushTimer::new(Duration::from_millis(20)));
        let (tx, mut rx) = mpsc::channel(8);

        let task = {
            let timer = timer.clone();
            tokio::spawn(async move { timer.run(&tx).await })
        };

        timer.set();
        timer.unset();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());

        task.abort();
    }

    #[tokio::test]
    async fn test_full_queue_retries_flush() {
        let timer = Arc::new(FlushTimer::new(Duration::from_millis(5)));
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(PendingCall::new(Request::echo("occupying"))).unwrap();

        let task = {
            let timer = timer.clone();
            let tx = tx.clone();
            tokio::spawn(async move { timer.run(&tx).await })
        };

        timer.set();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(timer.is_armed());

        let first = rx.try_recv().unwrap();
        assert!(!first.request().is_flush());

        let injected = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(injected.request().is_flush());

        task.abort();
    }
}
