//! Shared utilities for integration testing.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, Response},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use reload_proxy::{
    BundleDescriptor, DestinationUrl, ProxyConfig, ProxyController, ProxyData, ReloadComplete,
    ReloadStart, WorkerConfig,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[allow(dead_code)]
/// Proxy config on ephemeral ports with short dial backoff.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.inspector.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.buffer_secs = 5;
    config.inspector.connect_attempts = 3;
    config.inspector.connect_base_delay_ms = 20;
    config.inspector.connect_max_delay_ms = 100;
    config
}

/// A mock HTTP runtime that answers every request with a fixed body.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(String, HeaderMap)>>>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Paths in the order they arrived.
    pub fn paths(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub fn last_headers(&self) -> Option<HeaderMap> {
        self.requests.lock().unwrap().last().map(|(_, h)| h.clone())
    }
}

/// How long the mock backend takes to answer `/slow` paths.
#[allow(dead_code)]
pub const SLOW_RESPONSE: std::time::Duration = std::time::Duration::from_millis(1500);

#[derive(Clone)]
struct BackendState {
    body: &'static str,
    backend: MockBackend,
}

#[allow(dead_code)]
/// Start a mock backend on an ephemeral port.
pub async fn start_mock_backend(body: &'static str) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = MockBackend {
        addr: listener.local_addr().unwrap(),
        hits: Arc::new(AtomicUsize::new(0)),
        requests: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .fallback(answer)
        .with_state(BackendState {
            body,
            backend: backend.clone(),
        });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    backend
}

async fn answer(State(state): State<BackendState>, request: Request<Body>) -> Response<Body> {
    state.backend.hits.fetch_add(1, Ordering::SeqCst);
    state
        .backend
        .requests
        .lock()
        .unwrap()
        .push((request.uri().path().to_string(), request.headers().clone()));
    // Paths under /slow hold the response back.
    if request.uri().path().starts_with("/slow") {
        tokio::time::sleep(SLOW_RESPONSE).await;
    }
    Response::new(Body::from(state.body))
}

/// An address nothing listens on.
#[allow(dead_code)]
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A mock runtime inspector that echoes messages back prefixed by its tag.
#[allow(dead_code)]
pub struct InspectorBackend {
    pub addr: SocketAddr,
    kill: broadcast::Sender<()>,
}

#[allow(dead_code)]
impl InspectorBackend {
    pub fn url(&self, worker: &str) -> String {
        format!("ws://{}/core:user:{}", self.addr, worker)
    }

    /// Drop every session without a close handshake and stop accepting.
    pub fn kill(&self) {
        let _ = self.kill.send(());
    }
}

#[allow(dead_code)]
pub async fn start_echo_inspector(tag: &'static str) -> InspectorBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (kill, _) = broadcast::channel(4);
    let sessions = kill.clone();
    let mut killed = kill.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { break };
                    let mut kill = sessions.subscribe();
                    tokio::spawn(async move {
                        let Ok(mut ws) = accept_async(stream).await else { return };
                        loop {
                            tokio::select! {
                                message = ws.next() => match message {
                                    Some(Ok(Message::Text(text))) => {
                                        let reply = Message::text(format!("{}:{}", tag, text.as_str()));
                                        if ws.send(reply).await.is_err() {
                                            break;
                                        }
                                    }
                                    Some(Ok(Message::Binary(data))) => {
                                        if ws.send(Message::Binary(data)).await.is_err() {
                                            break;
                                        }
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                },
                                _ = kill.recv() => break,
                            }
                        }
                    });
                }
                _ = killed.recv() => break,
            }
        }
    });

    InspectorBackend { addr, kill }
}

#[allow(dead_code)]
pub fn bundle(id: u64) -> BundleDescriptor {
    BundleDescriptor::from(json!({ "format": "modules", "id": id }))
}

#[allow(dead_code)]
pub fn reload_start(worker: &str, bundle_id: u64) -> ReloadStart {
    ReloadStart {
        config: WorkerConfig::new(worker),
        bundle: bundle(bundle_id),
    }
}

#[allow(dead_code)]
pub fn reload_complete(
    worker: &str,
    bundle_id: u64,
    http: SocketAddr,
    inspector: Option<&InspectorBackend>,
) -> ReloadComplete {
    ReloadComplete {
        config: WorkerConfig::new(worker),
        bundle: bundle(bundle_id),
        proxy_data: ProxyData {
            destination_url: DestinationUrl::Full(format!("http://{}", http)),
            destination_inspector_url: inspector.map(|i| i.url(worker)),
            headers: BTreeMap::new(),
        },
        generation: None,
    }
}

/// Run a full reload cycle and wait until the worker task has applied it.
#[allow(dead_code)]
pub async fn reload(
    controller: &ProxyController,
    worker: &str,
    bundle_id: u64,
    http: SocketAddr,
    inspector: Option<&InspectorBackend>,
) {
    controller.on_reload_start(reload_start(worker, bundle_id)).unwrap();
    controller
        .on_reload_complete(reload_complete(worker, bundle_id, http, inspector))
        .unwrap();
    settle(controller, worker).await;
}

#[allow(dead_code)]
/// Wait until every command already sent to `worker` has been applied.
pub async fn settle(controller: &ProxyController, worker: &str) {
    controller.status(worker).await.unwrap();
}

#[allow(dead_code)]
pub fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[allow(dead_code)]
pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
