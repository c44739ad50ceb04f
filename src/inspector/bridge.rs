//! WebSocket bridge between a debugger client and the live runtime inspector.
//!
//! # Responsibilities
//! - Own exactly one client socket and at most one backend socket
//! - Relay text/binary messages both ways without inspecting them
//! - Rebind the backend whenever the worker's live destination changes
//! - Hold the client open while no destination is live
//!
//! # Design Decisions
//! - A backend that closes while its generation is still live is a crash:
//!   the client is closed with `BACKEND_CLOSED_CODE`
//! - A backend that closes during a reload is expected; the bridge waits
//! - Client messages sent while unbound are queued (bounded) and replayed
//! - Dialing runs alongside the relay loop, each attempt bounded by the
//!   connect timeout; a newer destination or a shutdown abandons it

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as BackendMessage, MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::error::ProxyError;
use crate::registry::{Generation, LiveDestination, WorkerName};
use crate::resilience::Backoff;

/// Close code sent to clients when the runtime inspector dies outside a reload.
pub const BACKEND_CLOSED_CODE: u16 = 4001;

/// Close code sent to clients when the proxy shuts down.
pub const GOING_AWAY_CODE: u16 = 1001;

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type BackendFrame = Result<BackendMessage, tokio_tungstenite::tungstenite::Error>;
type DialResult = Result<Option<BackendSocket>, ProxyError>;

/// Tunables for a bridge.
#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub dial: Backoff,
    /// Limit on a single connection attempt, handshake included.
    pub connect_timeout: Duration,
    pub max_buffered_messages: usize,
}

/// Why a bridge stopped.
#[derive(Debug)]
pub enum BridgeExit {
    ClientClosed,
    BackendClosed(ProxyError),
    Shutdown,
}

struct BoundBackend {
    generation: Generation,
    url: Url,
    socket: BackendSocket,
}

struct PendingDial {
    generation: Generation,
    url: Url,
    attempt: Pin<Box<dyn Future<Output = DialResult> + Send>>,
}

/// One debugger session.
pub struct InspectorBridge {
    worker: WorkerName,
    client: WebSocket,
    backend: Option<BoundBackend>,
    dialing: Option<PendingDial>,
    destinations: watch::Receiver<Option<LiveDestination>>,
    buffered: VecDeque<BackendMessage>,
    settings: BridgeSettings,
    shutdown: broadcast::Receiver<()>,
}

impl InspectorBridge {
    pub fn new(
        worker: WorkerName,
        client: WebSocket,
        destinations: watch::Receiver<Option<LiveDestination>>,
        settings: BridgeSettings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            worker,
            client,
            backend: None,
            dialing: None,
            destinations,
            buffered: VecDeque::new(),
            settings,
            shutdown,
        }
    }

    /// Relay until the client leaves, the backend crashes, or the proxy stops.
    pub async fn run(mut self) -> BridgeExit {
        let initial = self.destinations.borrow_and_update().clone();
        self.rebind(initial).await;

        loop {
            tokio::select! {
                changed = self.destinations.changed() => {
                    if changed.is_err() {
                        // Worker task is gone.
                        return self.shut_down().await;
                    }
                    let next = self.destinations.borrow_and_update().clone();
                    self.rebind(next).await;
                }
                dialed = next_dial(&mut self.dialing) => {
                    let Some(pending) = self.dialing.take() else {
                        continue;
                    };
                    match dialed {
                        Ok(Some(socket)) => self.bind(pending, socket).await,
                        // Superseded; the watch delivers the newer destination.
                        Ok(None) => {}
                        Err(e) => return self.fail(e).await,
                    }
                }
                message = self.client.recv() => match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        self.close_backend().await;
                        return BridgeExit::ClientClosed;
                    }
                    Some(Ok(message)) => {
                        if let Some(message) = client_to_backend(message) {
                            if let Err(e) = self.send_backend(message).await {
                                return self.fail(e).await;
                            }
                        }
                    }
                },
                frame = next_frame(&mut self.backend) => {
                    let lost = match frame {
                        Some(Ok(BackendMessage::Close(frame))) => Some(match frame {
                            Some(frame) => format!("closed with code {}", u16::from(frame.code)),
                            None => "closed without a close frame".to_string(),
                        }),
                        Some(Ok(message)) => {
                            if let Some(message) = backend_to_client(message) {
                                if self.client.send(message).await.is_err() {
                                    self.close_backend().await;
                                    return BridgeExit::ClientClosed;
                                }
                            }
                            None
                        }
                        Some(Err(e)) => Some(e.to_string()),
                        None => Some("stream ended".to_string()),
                    };
                    if let Some(reason) = lost {
                        if let Err(e) = self.backend_lost(reason) {
                            return self.fail(e).await;
                        }
                    }
                }
                _ = self.shutdown.recv() => {
                    return self.shut_down().await;
                }
            }
        }
    }

    /// Point the bridge at `next`. Closes the current backend unless it
    /// already serves this generation; starts dialing when `next` has an
    /// inspector. The client socket is never touched.
    pub async fn rebind(&mut self, next: Option<LiveDestination>) {
        let Some(live) = next else {
            if self.backend.is_some() || self.dialing.is_some() {
                tracing::debug!(worker = %self.worker, "Reload in progress, detaching inspector backend");
            }
            self.close_backend().await;
            return;
        };

        if self.backend.as_ref().map(|b| b.generation) == Some(live.generation)
            || self.dialing.as_ref().map(|d| d.generation) == Some(live.generation)
        {
            return;
        }
        self.close_backend().await;

        let Some(url) = live.destination.inspector_url.clone() else {
            tracing::debug!(worker = %self.worker, generation = %live.generation, "Live destination has no inspector");
            return;
        };

        let attempt = dial(
            self.worker.clone(),
            self.destinations.clone(),
            self.settings,
            url.clone(),
            live.generation,
        );
        self.dialing = Some(PendingDial {
            generation: live.generation,
            url,
            attempt: Box::pin(attempt),
        });
    }

    async fn bind(&mut self, pending: PendingDial, socket: BackendSocket) {
        tracing::info!(
            worker = %self.worker,
            generation = %pending.generation,
            url = %pending.url,
            "Inspector backend bound"
        );
        self.backend = Some(BoundBackend {
            generation: pending.generation,
            url: pending.url,
            socket,
        });
        self.flush_buffered().await;
    }

    fn is_current(&self, generation: Generation) -> bool {
        is_current(&self.destinations, generation)
    }

    async fn send_backend(&mut self, message: BackendMessage) -> Result<(), ProxyError> {
        let Some(backend) = self.backend.as_mut() else {
            if self.buffered.len() >= self.settings.max_buffered_messages {
                self.buffered.pop_front();
                tracing::warn!(worker = %self.worker, "Inspector buffer full, dropping oldest message");
            }
            self.buffered.push_back(message);
            return Ok(());
        };

        match backend.socket.send(message).await {
            Ok(()) => Ok(()),
            Err(e) => self.backend_lost(e.to_string()),
        }
    }

    async fn flush_buffered(&mut self) {
        while let Some(message) = self.buffered.pop_front() {
            let Some(backend) = self.backend.as_mut() else {
                self.buffered.push_front(message);
                return;
            };
            if let Err(e) = backend.socket.send(message).await {
                tracing::warn!(worker = %self.worker, error = %e, "Failed to replay buffered inspector message");
                return;
            }
        }
    }

    /// The backend went away. Expected during a reload; a crash otherwise.
    fn backend_lost(&mut self, reason: String) -> Result<(), ProxyError> {
        let Some(backend) = self.backend.take() else {
            return Ok(());
        };

        if !self.is_current(backend.generation) {
            tracing::debug!(worker = %self.worker, url = %backend.url, "Inspector backend closed for reload");
            return Ok(());
        }

        Err(ProxyError::InspectorBackendClosed {
            worker: self.worker.to_string(),
            reason,
        })
    }

    async fn fail(mut self, error: ProxyError) -> BridgeExit {
        tracing::warn!(worker = %self.worker, error = %error, "Closing inspector client");
        self.close_backend().await;
        let reason = truncate_reason(&error.to_string());
        let _ = self
            .client
            .send(Message::Close(Some(CloseFrame {
                code: BACKEND_CLOSED_CODE,
                reason: reason.into(),
            })))
            .await;
        BridgeExit::BackendClosed(error)
    }

    async fn shut_down(mut self) -> BridgeExit {
        self.close_backend().await;
        let _ = self
            .client
            .send(Message::Close(Some(CloseFrame {
                code: GOING_AWAY_CODE,
                reason: "proxy shutting down".into(),
            })))
            .await;
        BridgeExit::Shutdown
    }

    /// Drop the backend, and any dial in progress.
    async fn close_backend(&mut self) {
        self.dialing = None;
        if let Some(mut backend) = self.backend.take() {
            let _ = backend.socket.close(None).await;
        }
    }
}

fn is_current(destinations: &watch::Receiver<Option<LiveDestination>>, generation: Generation) -> bool {
    matches!(&*destinations.borrow(), Some(live) if live.generation == generation)
}

/// Dial `url` with backoff. `Ok(None)` when `generation` stopped being live
/// while dialing.
async fn dial(
    worker: WorkerName,
    destinations: watch::Receiver<Option<LiveDestination>>,
    settings: BridgeSettings,
    url: Url,
    generation: Generation,
) -> DialResult {
    let backoff = settings.dial;
    let mut last_error = String::new();
    for attempt in 1..=backoff.attempts {
        if !is_current(&destinations, generation) {
            return Ok(None);
        }
        match tokio::time::timeout(settings.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((socket, _))) => return Ok(Some(socket)),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => {
                last_error = format!("timed out after {}ms", settings.connect_timeout.as_millis());
            }
        }
        tracing::debug!(worker = %worker, attempt, error = %last_error, "Inspector backend dial failed");
        if attempt < backoff.attempts {
            tokio::time::sleep(backoff.delay(attempt)).await;
        }
    }

    if !is_current(&destinations, generation) {
        return Ok(None);
    }
    Err(ProxyError::InspectorBackendClosed {
        worker: worker.to_string(),
        reason: format!(
            "could not connect to {} after {} attempts: {}",
            url, backoff.attempts, last_error
        ),
    })
}

async fn next_dial(dialing: &mut Option<PendingDial>) -> DialResult {
    match dialing {
        Some(pending) => pending.attempt.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(backend: &mut Option<BoundBackend>) -> Option<BackendFrame> {
    match backend {
        Some(backend) => backend.socket.next().await,
        None => std::future::pending().await,
    }
}

/// Client → backend. Control frames are handled by each socket on its own.
fn client_to_backend(message: Message) -> Option<BackendMessage> {
    match message {
        Message::Text(text) => Some(BackendMessage::text(text.as_str().to_owned())),
        Message::Binary(data) => Some(BackendMessage::binary(data)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}

/// Backend → client.
fn backend_to_client(message: BackendMessage) -> Option<Message> {
    match message {
        BackendMessage::Text(text) => Some(Message::Text(text.as_str().to_owned().into())),
        BackendMessage::Binary(data) => Some(Message::Binary(data)),
        _ => None,
    }
}

/// Close reasons must fit in a control frame (123 bytes).
fn truncate_reason(reason: &str) -> String {
    if reason.len() <= 123 {
        return reason.to_string();
    }
    let mut end = 123;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    use tokio::net::TcpListener;

    use crate::registry::Destination;

    /// Accepts TCP connections and never answers the WebSocket handshake.
    async fn silent_listener() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        format!("ws://{}/core:user:w", addr).parse().unwrap()
    }

    fn live_at(url: &Url) -> LiveDestination {
        LiveDestination {
            generation: Generation::new(1),
            destination: Arc::new(
                Destination::new("http://127.0.0.1:1".parse().unwrap()).with_inspector(url.clone()),
            ),
        }
    }

    fn settings(attempts: u32) -> BridgeSettings {
        BridgeSettings {
            dial: Backoff::new(attempts, 10, 20),
            connect_timeout: Duration::from_millis(100),
            max_buffered_messages: 8,
        }
    }

    #[tokio::test]
    async fn test_dial_gives_up_on_silent_backend() {
        let url = silent_listener().await;
        let (_tx, rx) = watch::channel(Some(live_at(&url)));

        let started = Instant::now();
        let result = dial(WorkerName::from("w"), rx, settings(2), url, Generation::new(1)).await;
        assert!(matches!(result, Err(ProxyError::InspectorBackendClosed { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_dial_stops_once_superseded() {
        let url = silent_listener().await;
        let (tx, rx) = watch::channel(Some(live_at(&url)));

        let attempt = tokio::spawn(dial(WorkerName::from("w"), rx, settings(50), url, Generation::new(1)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(None).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), attempt)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Ok(None)));
    }

    #[test]
    fn test_message_mapping_is_opaque() {
        let text = client_to_backend(Message::Text("{\"id\":1}".into())).unwrap();
        assert_eq!(text, BackendMessage::text("{\"id\":1}"));

        let back = backend_to_client(BackendMessage::binary(vec![1u8, 2, 3])).unwrap();
        assert!(matches!(back, Message::Binary(ref b) if &b[..] == &[1u8, 2, 3][..]));

        assert!(client_to_backend(Message::Ping(Default::default())).is_none());
        assert!(backend_to_client(BackendMessage::Pong(Default::default())).is_none());
    }

    #[test]
    fn test_truncate_reason() {
        assert_eq!(truncate_reason("short"), "short");
        let long = "é".repeat(100);
        let cut = truncate_reason(&long);
        assert!(cut.len() <= 123);
        assert!(long.starts_with(&cut));
    }
}
