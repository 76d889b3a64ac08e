//! End-to-end tests for the stream endpoint: real listener, real HTTP
//! client, real filesystem events.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mdpulse::client::SseDecoder;
use mdpulse::server::app;
use mdpulse::{BroadcastHub, ChangeEvent, WatchSupervisor};
use tokio::time::timeout;

struct TestServer {
    addr: SocketAddr,
    hub: Arc<BroadcastHub>,
    _workspace: tempfile::TempDir,
    docs: PathBuf,
}

async fn spawn_server() -> TestServer {
    let workspace = tempfile::tempdir().unwrap();
    let docs = workspace.path().join("docs");
    let tasks = workspace.path().join("tasks");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::create_dir_all(&tasks).unwrap();

    let supervisor = Arc::new(WatchSupervisor::new(vec![docs.clone(), tasks]));
    let hub = BroadcastHub::new(supervisor);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(Arc::clone(&hub));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        addr,
        hub,
        _workspace: workspace,
        docs,
    }
}

struct EventReader {
    response: reqwest::Response,
    decoder: SseDecoder,
    ready: Vec<ChangeEvent>,
}

impl EventReader {
    async fn open(addr: SocketAddr) -> Self {
        let response = reqwest::get(format!("http://{addr}/api/events"))
            .await
            .unwrap();
        assert!(response.status().is_success());
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(
            content_type.starts_with("text/event-stream"),
            "unexpected content type: {content_type}"
        );
        Self {
            response,
            decoder: SseDecoder::new(),
            ready: Vec::new(),
        }
    }

    async fn next_event(&mut self) -> ChangeEvent {
        loop {
            if !self.ready.is_empty() {
                return self.ready.remove(0);
            }
            let chunk = timeout(Duration::from_secs(10), self.response.chunk())
                .await
                .expect("timed out waiting for event")
                .expect("stream failed")
                .expect("stream ended");
            for payload in self.decoder.feed(&chunk) {
                self.ready.push(serde_json::from_str(&payload).unwrap());
            }
        }
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition never became true: {what}");
}

#[tokio::test]
async fn subscriber_gets_connected_then_file_events() {
    let server = spawn_server().await;

    let mut reader = EventReader::open(server.addr).await;
    let first = reader.next_event().await;
    assert!(matches!(first, ChangeEvent::Connected { .. }));
    assert_eq!(server.hub.subscriber_count(), 1);
    assert!(server.hub.supervisor().is_running());

    std::fs::write(server.docs.join("guide.md"), b"# guide").unwrap();

    let event = reader.next_event().await;
    let path = event.path().expect("expected a file event");
    assert!(path.ends_with("guide.md"));
    assert!(matches!(
        event,
        ChangeEvent::FileAdd { .. } | ChangeEvent::FileChange { .. }
    ));
}

#[tokio::test]
async fn events_fan_out_to_every_subscriber() {
    let server = spawn_server().await;

    let mut first = EventReader::open(server.addr).await;
    let mut second = EventReader::open(server.addr).await;
    assert!(matches!(
        first.next_event().await,
        ChangeEvent::Connected { .. }
    ));
    assert!(matches!(
        second.next_event().await,
        ChangeEvent::Connected { .. }
    ));
    assert_eq!(server.hub.subscriber_count(), 2);

    std::fs::write(server.docs.join("shared.md"), b"x").unwrap();

    for reader in [&mut first, &mut second] {
        let event = reader.next_event().await;
        assert!(event.path().unwrap().ends_with("shared.md"));
    }
}

#[tokio::test]
async fn disconnect_releases_sink_and_stops_watcher() {
    let server = spawn_server().await;

    let mut reader = EventReader::open(server.addr).await;
    assert!(matches!(
        reader.next_event().await,
        ChangeEvent::Connected { .. }
    ));
    assert!(server.hub.supervisor().is_running());

    drop(reader);

    let hub = Arc::clone(&server.hub);
    wait_until("subscriber deregistered", || hub.subscriber_count() == 0).await;
    assert!(!server.hub.supervisor().is_running());
}

#[tokio::test]
async fn non_markdown_files_never_reach_the_stream() {
    let server = spawn_server().await;

    let mut reader = EventReader::open(server.addr).await;
    assert!(matches!(
        reader.next_event().await,
        ChangeEvent::Connected { .. }
    ));

    std::fs::write(server.docs.join("image.png"), b"png").unwrap();
    // The marker write proves ordering: if the png had produced an event it
    // would have arrived first.
    std::fs::write(server.docs.join("marker.md"), b"marker").unwrap();

    let event = reader.next_event().await;
    assert!(event.path().unwrap().ends_with("marker.md"));
}

#[tokio::test]
async fn health_endpoint_answers() {
    let server = spawn_server().await;
    let body = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "OK");
}
