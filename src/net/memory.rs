//! In-memory transport.
//!
//! Connections record what is sent on them instead of writing to a socket.
//! Used to drive the gateway and client managers without the network.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use futures_util::future::BoxFuture;

use crate::net::connection::ConnectionId;
use crate::net::transport::{Connection, ConnectionEvent, ConnectionRef, Connector, FrameHandler, TransportError};
use crate::protocol::Frame;

/// Computes the reply to a correlated call. `None` means the call times out.
pub type Responder = Arc<dyn Fn(&Frame) -> Option<Frame> + Send + Sync>;

/// A connection that records outgoing frames.
pub struct MemoryConnection {
    id: ConnectionId,
    remote_address: String,
    sent: Mutex<Vec<Frame>>,
    open: AtomicBool,
    fail_sends: AtomicBool,
    responder: Option<Responder>,
}

impl MemoryConnection {
    pub fn new(remote_address: impl Into<String>) -> Arc<Self> {
        Self::build(remote_address.into(), None)
    }

    /// Connection that answers `send_await` through `responder`.
    pub fn with_responder(remote_address: impl Into<String>, responder: Responder) -> Arc<Self> {
        Self::build(remote_address.into(), Some(responder))
    }

    fn build(remote_address: String, responder: Option<Responder>) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            remote_address,
            sent: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            responder,
        })
    }

    /// Frames sent so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Make every following send fail while the connection stays open.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    fn record(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.is_open() || self.fail_sends.load(Ordering::Acquire) {
            return Err(TransportError::Closed(self.remote_address.clone()));
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(frame);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_address(&self) -> &str {
        &self.remote_address
    }

    fn send_oneway(&self, frame: Frame) -> Result<(), TransportError> {
        self.record(frame)
    }

    fn reply(&self, _invoke_id: u64, frame: Frame) -> Result<(), TransportError> {
        self.record(frame)
    }

    fn send_await(&self, frame: Frame, timeout: Duration) -> BoxFuture<'_, Result<Frame, TransportError>> {
        Box::pin(async move {
            let reply = self.responder.as_ref().and_then(|respond| respond(&frame));
            self.record(frame)?;
            reply.ok_or(TransportError::Timeout(timeout))
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

struct Dialed {
    connection: Arc<MemoryConnection>,
    handler: Arc<dyn FrameHandler>,
}

/// Connector producing [`MemoryConnection`]s.
///
/// Every connection acknowledges module registration unless a custom
/// responder is installed. Addresses can be refused to simulate failures.
pub struct MemoryConnector {
    dialed: DashMap<String, Dialed>,
    refused: DashSet<String>,
    responder: Responder,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::with_responder(Arc::new(|frame: &Frame| match frame {
            Frame::ModuleRegister(_) => Some(Frame::ModuleRegisterAck {
                broker_id: "memory".to_string(),
            }),
            _ => None,
        }))
    }

    pub fn with_responder(responder: Responder) -> Self {
        Self {
            dialed: DashMap::new(),
            refused: DashSet::new(),
            responder,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fail every following connect to `address`.
    pub fn refuse(&self, address: &str) {
        self.refused.insert(address.to_string());
    }

    pub fn accept(&self, address: &str) {
        self.refused.remove(address);
    }

    /// Number of connect calls so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Latest connection dialed to `address`.
    pub fn connection(&self, address: &str) -> Option<Arc<MemoryConnection>> {
        self.dialed.get(address).map(|d| Arc::clone(&d.connection))
    }

    /// Report a lifecycle event on the latest connection to `address`.
    pub fn emit(&self, address: &str, event: ConnectionEvent) -> bool {
        let Some((connection, handler)) = self.dialed_pair(address) else {
            return false;
        };
        if event != ConnectionEvent::Connect {
            connection.close();
        }
        let conn_ref: ConnectionRef = connection;
        handler.on_event(event, &conn_ref);
        true
    }

    /// Deliver an inbound frame on the latest connection to `address`.
    pub fn deliver(&self, address: &str, invoke_id: Option<u64>, frame: Frame) -> bool {
        let Some((connection, handler)) = self.dialed_pair(address) else {
            return false;
        };
        let conn_ref: ConnectionRef = connection;
        handler.on_frame(&conn_ref, invoke_id, frame);
        true
    }

    fn dialed_pair(&self, address: &str) -> Option<(Arc<MemoryConnection>, Arc<dyn FrameHandler>)> {
        self.dialed
            .get(address)
            .map(|d| (Arc::clone(&d.connection), Arc::clone(&d.handler)))
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MemoryConnector {
    fn connect<'a>(
        &'a self,
        address: &'a str,
        handler: Arc<dyn FrameHandler>,
    ) -> BoxFuture<'a, Result<ConnectionRef, TransportError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::Relaxed);
            if self.refused.contains(address) {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("{address} refused"),
                )));
            }

            let connection = MemoryConnection::with_responder(address, Arc::clone(&self.responder));
            self.dialed.insert(
                address.to_string(),
                Dialed {
                    connection: Arc::clone(&connection),
                    handler: Arc::clone(&handler),
                },
            );

            let conn_ref: ConnectionRef = connection;
            handler.on_event(ConnectionEvent::Connect, &conn_ref);
            Ok(conn_ref)
        })
    }
}
