//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use crate::responder::SyncResponder;
use notegraph_sync_protocol::{
    ChangesRequest, ChangesResponse, HandshakeRequest, HandshakeResponse, PayloadRequest,
    PayloadResponse, ProtocolError, PushRequest, PushResponse, SectorHashesRequest,
    SectorHashesResponse, SyncMessage,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A request/response channel to one peer.
///
/// Implementations only move [`SyncMessage`]s; the typed methods wrap
/// [`SyncTransport::exchange`] and turn an error reply into
/// [`SyncError::Remote`].
pub trait SyncTransport: Send + Sync {
    /// Sends one request and waits for its reply.
    fn exchange(&self, request: SyncMessage) -> SyncResult<SyncMessage>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;

    /// Performs a handshake with the peer.
    fn handshake(&self, request: HandshakeRequest) -> SyncResult<HandshakeResponse> {
        expect(self.exchange(request.into())?)
    }

    /// Fetches log entries after a position.
    fn changes_since(&self, request: ChangesRequest) -> SyncResult<ChangesResponse> {
        expect(self.exchange(request.into())?)
    }

    /// Fetches current entity versions.
    fn payloads(&self, request: PayloadRequest) -> SyncResult<PayloadResponse> {
        expect(self.exchange(request.into())?)
    }

    /// Sends local changes.
    fn push(&self, request: PushRequest) -> SyncResult<PushResponse> {
        expect(self.exchange(request.into())?)
    }

    /// Fetches the peer's content hash sectors.
    fn sector_hashes(&self) -> SyncResult<SectorHashesResponse> {
        expect(self.exchange(SectorHashesRequest.into())?)
    }
}

fn expect<R>(reply: SyncMessage) -> SyncResult<R>
where
    R: TryFrom<SyncMessage, Error = ProtocolError>,
{
    match reply {
        SyncMessage::Error(e) => Err(SyncError::Remote {
            message: e.message,
            retryable: e.retryable,
        }),
        other => Ok(R::try_from(other)?),
    }
}

/// A transport that calls a responder in the same process.
#[derive(Debug)]
pub struct InProcessTransport {
    responder: Arc<SyncResponder>,
    connected: AtomicBool,
}

impl InProcessTransport {
    /// Connects to a responder.
    pub fn new(responder: Arc<SyncResponder>) -> Self {
        Self {
            responder,
            connected: AtomicBool::new(true),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl SyncTransport for InProcessTransport {
    fn exchange(&self, request: SyncMessage) -> SyncResult<SyncMessage> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        Ok(self.responder.handle(request))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Wraps a transport and fails every exchange once a budget is spent.
///
/// Used to interrupt a sync at a chosen round-trip.
#[derive(Debug)]
pub struct FlakyTransport<T: SyncTransport> {
    inner: T,
    remaining: Mutex<Option<usize>>,
    failures: Mutex<usize>,
}

impl<T: SyncTransport> FlakyTransport<T> {
    /// Wraps a transport that never fails until told to.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            remaining: Mutex::new(None),
            failures: Mutex::new(0),
        }
    }

    /// Lets `exchanges` more round-trips through, then fails the rest.
    pub fn fail_after(&self, exchanges: usize) {
        *self.remaining.lock() = Some(exchanges);
    }

    /// Stops failing.
    pub fn heal(&self) {
        *self.remaining.lock() = None;
    }

    /// Number of exchanges failed so far.
    pub fn failures(&self) -> usize {
        *self.failures.lock()
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: SyncTransport> SyncTransport for FlakyTransport<T> {
    fn exchange(&self, request: SyncMessage) -> SyncResult<SyncMessage> {
        {
            let mut remaining = self.remaining.lock();
            match remaining.as_mut() {
                Some(0) => {
                    *self.failures.lock() += 1;
                    return Err(SyncError::transport_retryable(format!(
                        "injected failure on {}",
                        request.name()
                    )));
                }
                Some(n) => *n -= 1,
                None => {}
            }
        }
        self.inner.exchange(request)
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&self) -> SyncResult<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notegraph_core::NoteGraph;
    use notegraph_sync_protocol::PROTOCOL_VERSION;

    fn transport() -> (NoteGraph, InProcessTransport) {
        let graph = NoteGraph::open_in_memory().unwrap();
        let responder = Arc::new(SyncResponder::new(&graph));
        (graph, InProcessTransport::new(responder))
    }

    #[test]
    fn in_process_connection() {
        let (_graph, transport) = transport();
        assert!(transport.is_connected());

        transport.set_connected(false);
        assert!(!transport.is_connected());
        let result = transport.sector_hashes();
        assert!(matches!(result, Err(SyncError::NotConnected)));

        transport.set_connected(true);
        transport.close().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn in_process_handshake() {
        let (graph, transport) = transport();
        let response = transport
            .handshake(HandshakeRequest::new("client".into()))
            .unwrap();
        assert!(response.accepted);
        assert_eq!(&response.instance_id, graph.instance_id());
        assert_eq!(response.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn error_reply_becomes_remote_error() {
        let (_graph, transport) = transport();
        // A response message is not a valid request.
        let err = expect::<ChangesResponse>(
            transport
                .exchange(SyncMessage::from(PushResponse { outcomes: vec![] }))
                .unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Remote { retryable: false, .. }));
    }

    #[test]
    fn flaky_transport_fails_after_budget() {
        let (_graph, inner) = transport();
        let transport = FlakyTransport::new(inner);
        transport.fail_after(1);

        assert!(transport.sector_hashes().is_ok());
        let err = transport.sector_hashes().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.failures(), 1);

        transport.heal();
        assert!(transport.sector_hashes().is_ok());
    }
}
