//! Fan-out of change events to every connected subscriber.
//!
//! The hub owns the live sink set and nothing else: sinks are bounded
//! channel senders whose receiving halves live with the connection. A dead
//! connection is discovered by its first failed write and dropped on the
//! spot, not probed.
//!
//! Registration side effects drive the watch supervisor: the first sink
//! starts the OS watcher, the last one leaving stops it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::watch::{ChangeEvent, WatchSupervisor};

/// Capacity of each per-subscriber sink. A subscriber that falls this far
/// behind is treated the same as a dead one.
const SINK_CAPACITY: usize = 64;

/// Capacity of the classified-event channel from the supervisor.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out hub over the live subscriber set.
pub struct BroadcastHub {
    sinks: Mutex<HashMap<u64, mpsc::Sender<ChangeEvent>>>,
    next_id: AtomicU64,
    supervisor: Arc<WatchSupervisor>,
    events_tx: mpsc::Sender<ChangeEvent>,
}

impl BroadcastHub {
    /// Create the hub and spawn its pump task, which moves classified events
    /// from the supervisor into `publish`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(supervisor: Arc<WatchSupervisor>) -> Arc<Self> {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let hub = Arc::new(Self {
            sinks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            supervisor,
            events_tx,
        });

        // The pump holds only a weak reference so dropping the hub ends it.
        let weak = Arc::downgrade(&hub);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(hub) = weak.upgrade() else {
                    break;
                };
                hub.publish(event);
            }
        });

        hub
    }

    /// Register a new subscriber.
    ///
    /// The subscriber receives a `connected` greeting before any filesystem
    /// event can reach it. The first registration starts the watch
    /// supervisor; a failure there leaves the stream serving in degraded
    /// mode (greeting and heartbeats only).
    pub fn register(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);

        // Greeting goes to this sink only, never broadcast.
        let _ = tx.try_send(ChangeEvent::connected());

        let mut sinks = self.sinks.lock();
        sinks.insert(id, tx);
        let first = sinks.len() == 1;
        drop(sinks);

        if first {
            if let Err(e) = self.supervisor.ensure_started(self.events_tx.clone()) {
                tracing::warn!("[hub] watcher unavailable, serving degraded: {e}");
            }
        }

        crate::debug_event!("hub", "registered", "subscriber {id}");
        Subscription {
            rx,
            guard: SubscriptionGuard {
                id,
                hub: Arc::clone(self),
            },
        }
    }

    /// Remove a subscriber. Stops the supervisor when the set empties.
    /// Idempotent: removing an unknown id is a no-op.
    fn unregister(&self, id: u64) {
        let mut sinks = self.sinks.lock();
        if sinks.remove(&id).is_some() {
            crate::debug_event!("hub", "unregistered", "subscriber {id}");
            if sinks.is_empty() {
                self.supervisor.stop_if_idle();
            }
        }
    }

    /// Push an event to every live sink.
    ///
    /// Writes are non-blocking and best-effort: a sink whose write fails
    /// (closed or full) is unregistered immediately so one slow client never
    /// stalls the rest.
    pub fn publish(&self, event: ChangeEvent) {
        let mut sinks = self.sinks.lock();
        let before = sinks.len();
        sinks.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                crate::debug_event!("hub", "dropping dead subscriber", "{id}");
                false
            }
        });
        if sinks.len() < before && sinks.is_empty() {
            self.supervisor.stop_if_idle();
        }
    }

    /// Emit `heartbeat` events on a fixed period while subscribers exist,
    /// until the token is cancelled.
    pub fn spawn_heartbeat(self: &Arc<Self>, period: Duration, ct: CancellationToken) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick would race the connected greeting.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = ct.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(hub) = weak.upgrade() else {
                    break;
                };
                if hub.subscriber_count() > 0 {
                    hub.publish(ChangeEvent::heartbeat());
                }
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn supervisor(&self) -> &WatchSupervisor {
        &self.supervisor
    }
}

/// One connected subscriber's receiving end plus its membership guard.
///
/// Dropping the subscription (or just its guard) deregisters the sink
/// exactly once.
pub struct Subscription {
    rx: mpsc::Receiver<ChangeEvent>,
    guard: SubscriptionGuard,
}

impl Subscription {
    /// Receive the next event. `None` means the hub dropped this sink.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Split into the raw receiver and the guard, for adapting into a
    /// response stream. The guard must be kept alive as long as events
    /// should flow.
    pub fn into_parts(self) -> (mpsc::Receiver<ChangeEvent>, SubscriptionGuard) {
        (self.rx, self.guard)
    }
}

/// Deregisters the sink on drop.
pub struct SubscriptionGuard {
    id: u64,
    hub: Arc<BroadcastHub>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn hub_over_tempdir() -> (tempfile::TempDir, Arc<BroadcastHub>) {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        let supervisor = Arc::new(WatchSupervisor::new(vec![docs]));
        let hub = BroadcastHub::new(supervisor);
        (dir, hub)
    }

    #[tokio::test]
    async fn first_registration_starts_supervisor_last_drop_stops_it() {
        let (_dir, hub) = hub_over_tempdir();
        assert!(!hub.supervisor().is_running());

        let first = hub.register();
        assert!(hub.supervisor().is_running());
        assert_eq!(hub.subscriber_count(), 1);

        // A second subscriber neither restarts nor duplicates the watch.
        let second = hub.register();
        assert!(hub.supervisor().is_running());
        assert_eq!(hub.subscriber_count(), 2);

        drop(second);
        assert!(hub.supervisor().is_running(), "non-last drop must not stop");
        assert_eq!(hub.subscriber_count(), 1);

        drop(first);
        assert!(!hub.supervisor().is_running());
        assert_eq!(hub.subscriber_count(), 0);

        // A later subscriber brings it back.
        let third = hub.register();
        assert!(hub.supervisor().is_running());
        drop(third);
    }

    #[tokio::test]
    async fn connected_greeting_goes_to_new_sink_only() {
        let (_dir, hub) = hub_over_tempdir();

        let mut first = hub.register();
        assert!(matches!(
            first.recv().await,
            Some(ChangeEvent::Connected { .. })
        ));

        let mut second = hub.register();
        assert!(matches!(
            second.recv().await,
            Some(ChangeEvent::Connected { .. })
        ));

        // The first subscriber saw exactly one event so far.
        hub.publish(ChangeEvent::file_change(PathBuf::from("/ws/docs/a.md")));
        let next = first.recv().await.unwrap();
        assert!(matches!(next, ChangeEvent::FileChange { .. }));
    }

    #[tokio::test]
    async fn failed_write_unregisters_sink_after_one_publish() {
        let (_dir, hub) = hub_over_tempdir();

        let healthy = hub.register();
        let dead = hub.register();
        assert_eq!(hub.subscriber_count(), 2);

        // Drop the receiving half but keep the membership guard alive: the
        // hub only learns about the death from the failed write.
        let (rx, _guard) = dead.into_parts();
        drop(rx);
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(ChangeEvent::file_change(PathBuf::from("/ws/docs/a.md")));
        assert_eq!(hub.subscriber_count(), 1);

        // The healthy subscriber still gets everything.
        let (mut rx, _g) = healthy.into_parts();
        assert!(matches!(rx.recv().await, Some(ChangeEvent::Connected { .. })));
        assert!(matches!(
            rx.recv().await,
            Some(ChangeEvent::FileChange { .. })
        ));
    }

    #[tokio::test]
    async fn heartbeats_reach_subscribers_and_stop_on_cancel() {
        let (_dir, hub) = hub_over_tempdir();
        let ct = CancellationToken::new();
        hub.spawn_heartbeat(Duration::from_millis(20), ct.clone());

        let (mut rx, _guard) = hub.register().into_parts();
        assert!(matches!(rx.recv().await, Some(ChangeEvent::Connected { .. })));

        let beat = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no heartbeat within timeout")
            .unwrap();
        assert!(matches!(beat, ChangeEvent::Heartbeat { .. }));

        ct.cancel();
        // Drain anything already in flight, then the stream must go quiet.
        tokio::time::sleep(Duration::from_millis(40)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err(), "heartbeat fired after cancellation");
    }

    #[tokio::test]
    async fn losing_last_sink_through_failed_write_stops_supervisor() {
        let (_dir, hub) = hub_over_tempdir();

        let only = hub.register();
        assert!(hub.supervisor().is_running());

        let (rx, _guard) = only.into_parts();
        drop(rx);
        hub.publish(ChangeEvent::heartbeat());

        assert_eq!(hub.subscriber_count(), 0);
        assert!(!hub.supervisor().is_running());
    }
}
