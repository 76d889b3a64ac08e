//! HTTP server surface for the live-update stream.

mod stream;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::config::Settings;
use crate::hub::BroadcastHub;
use crate::watch::WatchSupervisor;

/// Shared state for the stream routes.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
}

/// Build the router. Split out from [`serve`] so tests can drive the app on
/// an ephemeral listener.
pub fn app(hub: Arc<BroadcastHub>) -> Router {
    Router::new()
        .route("/api/events", get(stream::subscribe_events))
        .route("/health", get(stream::health_check))
        // Local tool; the browser UI runs on a different dev port.
        .layer(CorsLayer::permissive())
        .with_state(AppState { hub })
}

/// Run the watch server until ctrl-c.
pub async fn serve(settings: Settings, bind: Option<String>) -> anyhow::Result<()> {
    crate::logging::init_with_config(&settings.logging);

    let bind = bind.unwrap_or_else(|| settings.server.bind.clone());
    let supervisor = Arc::new(WatchSupervisor::from_settings(&settings));
    if supervisor.roots().is_empty() {
        tracing::warn!("[serve] no watch roots exist; stream will carry heartbeats only");
    }

    let ct = CancellationToken::new();
    let hub = BroadcastHub::new(supervisor);
    hub.spawn_heartbeat(
        Duration::from_secs(settings.server.heartbeat_secs),
        ct.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    crate::log_event!("serve", "listening", "http://{bind}/api/events");

    let server = axum::serve(listener, app(hub));
    let result = tokio::select! {
        result = server => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            crate::log_event!("serve", "shutting down");
            Ok(())
        }
    };

    // The heartbeat task must stop on the error path too.
    ct.cancel();
    result
}
