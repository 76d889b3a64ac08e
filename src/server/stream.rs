//! The SSE stream endpoint: a thin adapter between HTTP and the hub.
//!
//! No business logic lives here. A request registers a sink, the response
//! streams whatever the hub pushes, and dropping the response stream (client
//! gone, shutdown) deregisters the sink exactly once via the guard.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::AppState;

/// `GET /api/events` - long-lived event stream, one JSON object per message.
pub async fn subscribe_events(State(state): State<AppState>) -> impl IntoResponse {
    let subscription = state.hub.register();
    let (rx, guard) = subscription.into_parts();

    let stream = ReceiverStream::new(rx).map(move |event| {
        // The guard rides along with the stream so the sink is deregistered
        // when the connection closes, and not before.
        let _live = &guard;
        let payload = serde_json::to_string(&event).unwrap_or_default();
        Ok::<Event, Infallible>(Event::default().data(payload))
    });

    ([(header::CACHE_CONTROL, "no-cache")], Sse::new(stream))
}

/// `GET /health` - liveness probe.
pub async fn health_check() -> &'static str {
    "OK"
}
