//! Inbound module connections.
//!
//! A slot is reserved before the socket is accepted, so a gateway holding
//! `max_connections` modules leaves further dials in the kernel backlog until
//! one of them goes away. The slot is carried by the [`ConnectionGuard`] that
//! the transport's reader task owns, and is released when that task ends.

use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::ListenerConfig;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Invalid bind address {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),
    #[error("Listener is closed")]
    Closed,
}

/// A module connection that has been given a slot.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Tracks the connection and holds its slot.
    pub guard: ConnectionGuard,
}

/// Gateway listener bounded by `max_connections`.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
    slots: Arc<Semaphore>,
    max_connections: usize,
    tracker: ConnectionTracker,
}

impl Listener {
    /// Bind `config.bind_address`. Accepted connections are counted by `tracker`.
    pub async fn bind(config: &ListenerConfig, tracker: ConnectionTracker) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|source| ListenerError::InvalidAddress {
                address: config.bind_address.clone(),
                source,
            })?;
        let bind_err = |source| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };

        let inner = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = inner.local_addr().map_err(bind_err)?;
        tracing::info!(address = %local_addr, max_connections = config.max_connections, "Listener bound");

        Ok(Self {
            inner,
            local_addr,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            tracker,
        })
    }

    /// Wait for a free slot, then for the next module to connect.
    pub async fn accept(&self) -> Result<Accepted, ListenerError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        if self.slots.available_permits() == 0 {
            tracing::warn!(max_connections = self.max_connections, "Connection limit reached");
        }

        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        let guard = self.tracker.track_slot(slot);
        tracing::debug!(connection_id = %guard.id(), peer = %peer, "Module connection accepted");

        Ok(Accepted { stream, peer, guard })
    }

    /// Address actually bound, with the OS-assigned port when `:0` was asked for.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }
}
