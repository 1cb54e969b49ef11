//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so any library
//! (reqwest, hyper, ureq) can carry the CBOR bodies. Each request kind is
//! posted to its own endpoint under `/sync/`. The client must give up on
//! a request once the transport's timeout has passed.

use crate::error::{SyncError, SyncResult};
use crate::responder::SyncResponder;
use crate::transport::SyncTransport;
use notegraph_sync_protocol::{ErrorResponse, SyncMessage};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body, failing once
    /// `timeout` has passed without a complete response.
    fn post(&self, url: &str, body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// The endpoint a request is posted to.
pub(crate) fn endpoint(message: &SyncMessage) -> &'static str {
    match message {
        SyncMessage::HandshakeRequest(_) | SyncMessage::HandshakeResponse(_) => "/sync/handshake",
        SyncMessage::ChangesRequest(_) | SyncMessage::ChangesResponse(_) => "/sync/changes",
        SyncMessage::PayloadRequest(_) | SyncMessage::PayloadResponse(_) => "/sync/payloads",
        SyncMessage::PushRequest(_) | SyncMessage::PushResponse(_) => "/sync/push",
        SyncMessage::SectorHashesRequest(_) | SyncMessage::SectorHashesResponse(_) => {
            "/sync/sectors"
        }
        SyncMessage::Error(_) => "/sync/error",
    }
}

/// HTTP-based sync transport.
///
/// Uses CBOR encoding for request/response bodies.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the peer (e.g., "https://notes.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Per-request deadline handed to the client.
    timeout: Duration,
    /// Connection state.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout: Duration::from_secs(30),
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Sets the per-request timeout, usually the engine's batch timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Marks the transport connected again after a failure.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn exchange(&self, request: SyncMessage) -> SyncResult<SyncMessage> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = request.encode()?;
        let url = format!("{}{}", self.base_url, endpoint(&request));
        debug!(%url, bytes = body.len(), "posting sync request");
        let response_body = self.client.post(&url, body, self.timeout).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            self.connected.store(false, Ordering::SeqCst);
            SyncError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        Ok(SyncMessage::decode(&response_body)?)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

impl LoopbackServer for SyncResponder {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let reply = match SyncMessage::decode(body) {
            Ok(request) if endpoint(&request) == path => self.handle(request),
            Ok(request) => SyncMessage::Error(ErrorResponse {
                message: format!("{} cannot be posted to {path}", request.name()),
                retryable: false,
            }),
            Err(e) => SyncMessage::Error(ErrorResponse {
                message: e.to_string(),
                retryable: false,
            }),
        };
        reply.encode().map_err(|e| e.to_string())
    }
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        (**self).handle_post(path, body)
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Exercises the full encode/post/decode path without a network.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    healthy: AtomicBool,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            healthy: AtomicBool::new(true),
        }
    }

    /// Simulates the link going down or coming back.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>, String> {
        if !self.is_healthy() {
            return Err(format!("connection refused: {url}"));
        }
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_core::{InstanceId, NoteGraph};
    use notegraph_sync_protocol::{HandshakeRequest, HandshakeResponse};

    struct TestClient {
        response: RwLock<Option<Vec<u8>>>,
        healthy: AtomicBool,
        last_timeout: RwLock<Option<Duration>>,
    }

    impl TestClient {
        fn new() -> Self {
            Self {
                response: RwLock::new(None),
                healthy: AtomicBool::new(true),
                last_timeout: RwLock::new(None),
            }
        }

        fn set_response(&self, resp: Vec<u8>) {
            *self.response.write() = Some(resp);
        }
    }

    impl HttpClient for TestClient {
        fn post(&self, _url: &str, _body: Vec<u8>, timeout: Duration) -> Result<Vec<u8>, String> {
            *self.last_timeout.write() = Some(timeout);
            self.response
                .read()
                .clone()
                .ok_or_else(|| "No response set".into())
        }

        fn is_healthy(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn transport_creation() {
        let transport = HttpTransport::new("https://notes.example.com/", TestClient::new());
        assert_eq!(transport.base_url(), "https://notes.example.com");
        assert!(transport.is_connected());
    }

    #[test]
    fn transport_not_connected_error() {
        let transport = HttpTransport::new("https://notes.example.com", TestClient::new());
        transport.close().unwrap();

        let result = transport.handshake(HandshakeRequest::new(InstanceId::from("x")));
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn transport_unhealthy_client() {
        let client = TestClient::new();
        client.healthy.store(false, Ordering::SeqCst);
        let transport = HttpTransport::new("https://notes.example.com", client);
        assert!(!transport.is_connected());
    }

    #[test]
    fn failed_post_disconnects_and_records_error() {
        let transport = HttpTransport::new("https://notes.example.com", TestClient::new());
        let err = transport.sector_hashes().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("No response set"));
        assert!(!transport.is_connected());

        transport.reconnect();
        assert!(transport.is_connected());
    }

    #[test]
    fn transport_handshake() {
        let client = TestClient::new();
        let response = HandshakeResponse::accept(InstanceId::from("srv"), 42);
        client.set_response(SyncMessage::from(response).encode().unwrap());

        let transport = HttpTransport::new("https://notes.example.com", client);
        let result = transport
            .handshake(HandshakeRequest::new(InstanceId::from("x")))
            .unwrap();
        assert!(result.accepted);
        assert_eq!(result.last_position, 42);
    }

    #[test]
    fn requests_carry_the_transport_timeout() {
        let transport = HttpTransport::new("https://notes.example.com", TestClient::new())
            .with_timeout(Duration::from_millis(250));
        assert_eq!(transport.timeout(), Duration::from_millis(250));

        let _ = transport.sector_hashes();
        assert_eq!(
            *transport.client.last_timeout.read(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn loopback_routes_by_endpoint() {
        let graph = NoteGraph::open_in_memory().unwrap();
        let responder = Arc::new(SyncResponder::new(&graph));
        let transport = HttpTransport::new(
            "http://loopback",
            LoopbackClient::new(Arc::clone(&responder)),
        );
        let response = transport
            .handshake(HandshakeRequest::new(InstanceId::from("x")))
            .unwrap();
        assert_eq!(&response.instance_id, graph.instance_id());

        let misrouted = responder
            .handle_post(
                "/sync/push",
                &SyncMessage::from(HandshakeRequest::new(InstanceId::from("x")))
                    .encode()
                    .unwrap(),
            )
            .unwrap();
        assert!(matches!(
            SyncMessage::decode(&misrouted).unwrap(),
            SyncMessage::Error(_)
        ));
    }
}
