//! One module-side connection to one gateway.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::client::dispatch::Dispatch;
use crate::net::{AtomicStatus, ConnectionRef, ConnectionStatus, TransportError};
use crate::protocol::{Frame, ModuleInfo, RequestMessage, ResponseMessage};

/// Shared item handle.
pub type ItemRef = Arc<BrokerClientItem>;

/// A module's connection to one gateway address.
///
/// Starts DISCONNECT and turns ACTIVE once the gateway acknowledged the
/// registration handshake.
pub struct BrokerClientItem {
    address: String,
    status: AtomicStatus,
    connection: OnceLock<ConnectionRef>,
    broker_id: OnceLock<String>,
    dispatch: Arc<dyn Dispatch>,
    request_timeout: Duration,
}

impl BrokerClientItem {
    pub(crate) fn new(address: String, dispatch: Arc<dyn Dispatch>, request_timeout: Duration) -> Self {
        Self {
            address,
            status: AtomicStatus::new(ConnectionStatus::Disconnect),
            connection: OnceLock::new(),
            broker_id: OnceLock::new(),
            dispatch,
            request_timeout,
        }
    }

    /// Gateway address as `host:port`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active() && self.connection.get().is_some_and(|c| c.is_open())
    }

    pub fn connection(&self) -> Option<&ConnectionRef> {
        self.connection.get()
    }

    /// Id the gateway reported in its registration ack.
    pub fn broker_id(&self) -> Option<&str> {
        self.broker_id.get().map(String::as_str)
    }

    pub(crate) fn attach(&self, connection: ConnectionRef) {
        if let Err(extra) = self.connection.set(connection) {
            extra.close();
        }
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) -> ConnectionStatus {
        self.status.set(status)
    }

    /// Announce `info` to the gateway and wait for its ack.
    pub(crate) async fn handshake(&self, info: ModuleInfo) -> Result<(), TransportError> {
        let connection = self
            .connection
            .get()
            .ok_or_else(|| TransportError::Closed(self.address.clone()))?;

        match connection
            .send_await(Frame::ModuleRegister(info), self.request_timeout)
            .await?
        {
            Frame::ModuleRegisterAck { broker_id } => {
                let _ = self.broker_id.set(broker_id);
                self.status.set(ConnectionStatus::Active);
                Ok(())
            }
            other => Err(TransportError::UnexpectedReply(other.name())),
        }
    }

    /// Send a request to the gateway for routing to another module.
    pub fn send_request(&self, request: RequestMessage) -> Result<(), TransportError> {
        self.send(Frame::Request(request))
    }

    pub fn send_response(&self, response: ResponseMessage) -> Result<(), TransportError> {
        self.send(Frame::Response(response))
    }

    /// Run a forwarded request through the dispatch context and answer it.
    pub(crate) fn handle_request(&self, request: RequestMessage) {
        let route = request.route_key();
        let response = self.dispatch.dispatch(request);
        if let Err(e) = self.send_response(response) {
            tracing::warn!(gateway = %self.address, route = %route, error = %e, "Failed to send response");
        }
    }

    pub fn close(&self) {
        if let Some(connection) = self.connection.get() {
            connection.close();
        }
    }

    fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.connection
            .get()
            .ok_or_else(|| TransportError::Closed(self.address.clone()))?
            .send_oneway(frame)
    }
}

impl std::fmt::Debug for BrokerClientItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClientItem")
            .field("address", &self.address)
            .field("status", &self.status())
            .field("broker_id", &self.broker_id.get())
            .finish()
    }
}

impl std::fmt::Display for BrokerClientItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gateway[{} {:?}]", self.address, self.status())
    }
}
