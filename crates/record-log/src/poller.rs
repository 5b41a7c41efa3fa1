use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollControl {
    Continue,
    Stop,
}

/// Owned handle to a periodic tail-refresh task. Dropping the handle cancels the task.
#[derive(Debug)]
pub struct TailPoller {
    handle: JoinHandle<()>,
}

impl TailPoller {
    /// Runs `tick` every `period`, first after one full period. Ticks never overlap and a
    /// slow tick delays the next one instead of causing a burst.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = PollControl> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tick().await == PollControl::Stop {
                    break;
                }
            }
            debug!("tail poller exited");
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TailPoller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use test_timeout::tokio_timeout_test;

    fn counting(period: Duration) -> (TailPoller, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let poller = TailPoller::spawn(period, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                PollControl::Continue
            }
        });
        (poller, ticks)
    }

    #[tokio_timeout_test(10, paused)]
    async fn ticks_once_per_period() {
        let (_poller, ticks) = counting(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2_600)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio_timeout_test(60, paused)]
    async fn stop_and_drop_cancel_the_task() {
        let (poller, ticks) = counting(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        poller.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        assert!(poller.is_finished());

        let (poller, ticks) = counting(Duration::from_secs(2));
        drop(poller);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio_timeout_test(10, paused)]
    async fn tick_can_end_the_loop() {
        let poller = TailPoller::spawn(Duration::from_secs(1), || async { PollControl::Stop });
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        tokio::task::yield_now().await;
        assert!(poller.is_finished());
    }
}
