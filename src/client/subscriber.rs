//! Reconnecting subscriber: the client end of the event stream.
//!
//! A state machine over `Idle/Connecting/Open/Reconnecting/GivenUp` with
//! exponential backoff between attempts. Transport failures never escape:
//! each one becomes a state transition plus a log line, and the rest of the
//! application keeps running on its last fetched data.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::watch::ChangeEvent;

use super::router::EventRouter;
use super::transport::EventTransport;

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    GivenUp,
}

/// Backoff schedule: delay for attempt `n` (0-indexed) is `base * 2^n`.
/// With the defaults that is 1s, 2s, 4s, 8s, 16s for attempts 0-4, and the
/// sixth consecutive failure gives up.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Handle to the running subscriber task.
///
/// Dropping the handle cancels the connection and every pending timer.
pub struct LiveUpdateClient {
    state_rx: watch::Receiver<ConnectionState>,
    reconnect: Arc<Notify>,
    ct: CancellationToken,
    _task: JoinHandle<()>,
}

impl LiveUpdateClient {
    /// Spawn the subscriber loop. Connection attempts are asynchronous and
    /// never block the caller.
    pub fn connect(
        transport: Arc<dyn EventTransport>,
        router: EventRouter,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let reconnect = Arc::new(Notify::new());
        let ct = CancellationToken::new();

        let task = tokio::spawn(run_loop(
            transport,
            router,
            policy,
            state_tx,
            Arc::clone(&reconnect),
            ct.clone(),
        ));

        Self {
            state_rx,
            reconnect,
            ct,
            _task: task,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch channel for state transitions, for a "live" indicator.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Manual retry affordance: restarts the attempt counter, effective
    /// immediately when waiting in `GivenUp` or backoff.
    pub fn reconnect(&self) {
        self.reconnect.notify_one();
    }

    /// Tear down the subscriber and cancel all timers.
    pub fn shutdown(&self) {
        self.ct.cancel();
    }
}

impl Drop for LiveUpdateClient {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

async fn run_loop(
    transport: Arc<dyn EventTransport>,
    router: EventRouter,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    reconnect: Arc<Notify>,
    ct: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        let _ = state.send(ConnectionState::Connecting);

        let saw_connected = tokio::select! {
            _ = ct.cancelled() => break,
            outcome = run_connection(transport.as_ref(), &router, &state) => outcome,
        };

        // A connection that reached Open restarts the backoff schedule.
        if saw_connected {
            attempt = 0;
        }

        if attempt >= policy.max_attempts {
            tracing::warn!(
                "[live] giving up after {} attempts; call reconnect() to retry",
                policy.max_attempts
            );
            let _ = state.send(ConnectionState::GivenUp);
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = reconnect.notified() => {
                    attempt = 0;
                    continue;
                }
            }
        }

        let delay = policy.delay_for(attempt);
        attempt += 1;
        let _ = state.send(ConnectionState::Reconnecting);
        crate::debug_event!("live", "reconnecting", "in {}ms", delay.as_millis());
        tokio::select! {
            _ = ct.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = reconnect.notified() => {
                attempt = 0;
            }
        }
    }

    // Teardown: nothing may fire after the subscriber is disposed.
    router.cancel_all();
}

/// Drive one connection until it fails or ends. Returns whether the stream
/// reached `Open` (saw its `connected` greeting).
async fn run_connection(
    transport: &dyn EventTransport,
    router: &EventRouter,
    state: &watch::Sender<ConnectionState>,
) -> bool {
    let mut stream = match transport.open().await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("[live] connect failed: {e}");
            return false;
        }
    };

    let mut saw_connected = false;
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                let Some(event) = parse_message(&message) else {
                    continue;
                };
                if matches!(event, ChangeEvent::Connected { .. }) && !saw_connected {
                    saw_connected = true;
                    let _ = state.send(ConnectionState::Open);
                    crate::log_event!("live", "connected");
                }
                router.route(&event);
            }
            Err(e) => {
                tracing::warn!("[live] stream error: {e}");
                break;
            }
        }
    }
    saw_connected
}

/// Parse one wire message.
///
/// A payload that is not JSON is logged and dropped; well-formed JSON with
/// an unrecognized `type` is silently ignored so newer servers can add
/// kinds. Neither aborts the connection.
fn parse_message(raw: &str) -> Option<ChangeEvent> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("[live] malformed event payload ({e}): {raw}");
            return None;
        }
    };
    match serde_json::from_value::<ChangeEvent>(value) {
        Ok(event) => Some(event),
        Err(_) => {
            tracing::debug!("[live] ignoring unrecognized event: {raw}");
            None
        }
    }
}
