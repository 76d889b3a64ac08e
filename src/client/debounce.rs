//! Reusable trailing-edge debounce.
//!
//! Collapses a burst of triggers into one action after a quiet period. Every
//! `notify()` cancels the pending timer and starts a fresh one, so a
//! continuous stream of triggers defers the action indefinitely until the
//! interval elapses in silence.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// A single debounced action. Each data domain owns one instance; instances
/// never share timers.
pub struct Debounce {
    interval: Duration,
    action: Arc<dyn Fn() + Send + Sync>,
    timer: Arc<Mutex<TimerSlot>>,
}

/// Each armed timer is stamped with the generation current at arm time and
/// may only fire while that stamp is still current. An abort that lands
/// after the sleep has already completed therefore still suppresses the
/// stale action.
struct TimerSlot {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl Debounce {
    pub fn new(interval: Duration, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            interval,
            action: Arc::new(action),
            timer: Arc::new(Mutex::new(TimerSlot {
                generation: 0,
                pending: None,
            })),
        }
    }

    /// Record a trigger: (re)start the quiet-period timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn notify(&self) {
        let mut slot = self.timer.lock();
        if let Some(pending) = slot.pending.take() {
            pending.abort();
        }
        slot.generation += 1;
        let armed = slot.generation;
        let interval = self.interval;
        let action = Arc::clone(&self.action);
        let timer = Arc::clone(&self.timer);
        slot.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            {
                let slot = timer.lock();
                if slot.generation != armed {
                    return;
                }
            }
            action();
        }));
    }

    /// Cancel any pending timer without running the action.
    pub fn cancel(&self) {
        let mut slot = self.timer.lock();
        if let Some(pending) = slot.pending.take() {
            pending.abort();
        }
        slot.generation += 1;
    }
}

impl Drop for Debounce {
    // No timer may fire after its owner is gone.
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counting(interval_ms: u64) -> (Debounce, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let debounce = Debounce::new(Duration::from_millis(interval_ms), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (debounce, fired)
    }

    #[tokio::test]
    async fn burst_collapses_to_one_action() {
        let (debounce, fired) = counting(50);

        for _ in 0..10 {
            debounce.notify();
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0, "still within quiet period");

        sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_trigger_restarts_the_wait() {
        let (debounce, fired) = counting(50);

        debounce.notify();
        sleep(Duration::from_millis(30)).await;
        debounce.notify();
        sleep(Duration::from_millis(30)).await;
        // 60ms since the first trigger, 30ms since the last: not yet.
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_on_the_deadline_yields_exactly_one_fire() {
        let (debounce, fired) = counting(50);

        debounce.notify();
        // Re-arm right at the edge of the first quiet period: the first
        // timer is superseded, only the second period fires.
        sleep(Duration::from_millis(49)).await;
        debounce.notify();
        sleep(Duration::from_millis(49)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "superseded timer fired");

        sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn separate_bursts_fire_separately() {
        let (debounce, fired) = counting(30);

        debounce.notify();
        sleep(Duration::from_millis(60)).await;
        debounce.notify();
        sleep(Duration::from_millis(60)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancel_suppresses_pending_action() {
        let (debounce, fired) = counting(30);

        debounce.notify();
        debounce.cancel();
        sleep(Duration::from_millis(60)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn drop_suppresses_pending_action() {
        let (debounce, fired) = counting(30);

        debounce.notify();
        drop(debounce);
        sleep(Duration::from_millis(60)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
