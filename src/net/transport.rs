//! Transport collaborator seam.
//!
//! The routing core only talks to connections through these traits, so the
//! TCP implementation in `tcp.rs` can be swapped for an in-memory one in tests.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::net::connection::ConnectionId;
use crate::protocol::Frame;

/// Errors raised by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is closed or its writer has gone away.
    #[error("connection to {0} is closed")]
    Closed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// A correlated call got a reply of the wrong kind.
    #[error("unexpected reply frame: {0}")]
    UnexpectedReply(&'static str),
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Close,
    Exception,
}

/// One live point-to-point channel.
pub trait Connection: Send + Sync + std::fmt::Debug {
    fn id(&self) -> ConnectionId;

    /// Peer address as `host:port`.
    fn remote_address(&self) -> &str;

    /// Fire-and-forget send. Never waits for the peer.
    fn send_oneway(&self, frame: Frame) -> Result<(), TransportError>;

    /// Answer a correlated call received with `invoke_id`.
    fn reply(&self, invoke_id: u64, frame: Frame) -> Result<(), TransportError>;

    /// Send and wait for the correlated reply, bounded by `timeout`.
    fn send_await(&self, frame: Frame, timeout: Duration) -> BoxFuture<'_, Result<Frame, TransportError>>;

    fn is_open(&self) -> bool;

    fn close(&self);
}

/// Shared connection handle.
pub type ConnectionRef = Arc<dyn Connection>;

/// Receives inbound frames and lifecycle events of a connection.
pub trait FrameHandler: Send + Sync {
    /// `invoke_id` is set when the peer waits for a reply.
    fn on_frame(&self, connection: &ConnectionRef, invoke_id: Option<u64>, frame: Frame);

    fn on_event(&self, event: ConnectionEvent, connection: &ConnectionRef) {
        let _ = (event, connection);
    }
}

/// Opens outbound connections.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        address: &'a str,
        handler: Arc<dyn FrameHandler>,
    ) -> BoxFuture<'a, Result<ConnectionRef, TransportError>>;
}
