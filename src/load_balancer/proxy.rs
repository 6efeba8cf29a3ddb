//! Gateway-side handle to one registered module connection.

use crate::net::connection::{AtomicStatus, ConnectionId, ConnectionStatus};
use crate::net::transport::{ConnectionRef, TransportError};
use crate::protocol::{Frame, ModuleInfo, ModuleKind, RequestMessage, ResponseMessage, RouteKey};

/// A registered module instance reachable through one connection.
#[derive(Debug)]
pub struct BrokerClientProxy {
    id: String,
    address: String,
    kind: ModuleKind,
    route_keys: Vec<RouteKey>,
    connection: ConnectionRef,
    status: AtomicStatus,
}

impl BrokerClientProxy {
    /// Create an ACTIVE proxy for a registered module.
    pub fn new(info: ModuleInfo, connection: ConnectionRef) -> Self {
        let mut route_keys = info.route_keys;
        route_keys.sort_unstable();
        route_keys.dedup();

        Self {
            id: info.id,
            address: info.address,
            kind: info.kind,
            route_keys,
            connection,
            status: AtomicStatus::new(ConnectionStatus::Active),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Advertised `host:port` of the module.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Route keys this proxy is registered under (empty for external modules).
    pub fn route_keys(&self) -> &[RouteKey] {
        &self.route_keys
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active() && self.connection.is_open()
    }

    /// Exclude this proxy from selection. Returns `true` if it was active.
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.status.set(ConnectionStatus::Disconnect) == ConnectionStatus::Active
    }

    /// Forward a request one-way.
    pub fn oneway(&self, request: RequestMessage) -> Result<(), TransportError> {
        self.connection.send_oneway(Frame::Request(request))
    }

    /// Push a response one-way.
    pub fn send_response(&self, response: ResponseMessage) -> Result<(), TransportError> {
        self.connection.send_oneway(Frame::Response(response))
    }
}

impl std::fmt::Display for BrokerClientProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}@{} {:?} {}]",
            self.kind,
            self.id,
            self.address,
            self.status(),
            self.connection.id()
        )
    }
}
