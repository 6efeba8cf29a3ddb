//! Inbound frame handling for gateway connections.
//!
//! # Responsibilities
//! - Register modules announcing themselves with `ModuleRegister`
//! - Route requests from external modules through the [`RequestRouter`]
//! - Return logic responses to the external module that sent the request
//! - Exclude or remove modules when their connection fails or closes

use std::sync::Arc;

use dashmap::DashMap;

use crate::gateway::router::RequestRouter;
use crate::load_balancer::BalancedManager;
use crate::net::{ConnectionEvent, ConnectionId, ConnectionRef, FrameHandler};
use crate::observability::metrics;
use crate::protocol::{Frame, ModuleInfo, ModuleKind, ResponseMessage};

/// What a connection registered as.
#[derive(Debug, Clone)]
struct Session {
    kind: ModuleKind,
    address: String,
}

/// Frame handler shared by every inbound gateway connection.
#[derive(Debug)]
pub struct GatewayProcessor {
    broker_id: String,
    balanced: Arc<BalancedManager>,
    router: RequestRouter,
    sessions: DashMap<ConnectionId, Session>,
    connections: DashMap<ConnectionId, ConnectionRef>,
    request_response_log: bool,
}

impl GatewayProcessor {
    pub fn new(broker_id: String, balanced: Arc<BalancedManager>, request_response_log: bool) -> Self {
        Self {
            broker_id,
            router: RequestRouter::new(Arc::clone(&balanced), request_response_log),
            balanced,
            sessions: DashMap::new(),
            connections: DashMap::new(),
            request_response_log,
        }
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    /// Open inbound connections, registered or not.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every inbound connection.
    pub fn close_all(&self) {
        let open: Vec<ConnectionRef> = self.connections.iter().map(|c| Arc::clone(c.value())).collect();
        for connection in open {
            connection.close();
        }
    }

    fn on_register(&self, connection: &ConnectionRef, invoke_id: Option<u64>, mut info: ModuleInfo) {
        if info.address.is_empty() {
            info.address = connection.remote_address().to_string();
        }
        if info.kind == ModuleKind::Logic && info.route_keys.is_empty() {
            tracing::warn!(module = %info.id, address = %info.address, "Logic module registered without route keys");
        }

        let session = Session {
            kind: info.kind,
            address: info.address.clone(),
        };
        if let Some(previous) = self.sessions.insert(connection.id(), session.clone()) {
            // The connection re-registered under another identity.
            if previous.address != session.address || previous.kind != session.kind {
                self.balanced
                    .remove_connection(previous.kind, &previous.address, connection.id());
            }
        }
        self.balanced.register(info, Arc::clone(connection));

        let ack = Frame::ModuleRegisterAck {
            broker_id: self.broker_id.clone(),
        };
        let sent = match invoke_id {
            Some(id) => connection.reply(id, ack),
            None => connection.send_oneway(ack),
        };
        if let Err(e) = sent {
            tracing::warn!(address = %session.address, error = %e, "Failed to acknowledge registration");
        }
    }

    fn on_response(&self, connection: &ConnectionRef, response: ResponseMessage) {
        if self.request_response_log {
            tracing::info!(
                route = %response.head.cmd_merge,
                msg_id = response.head.msg_id,
                status = ?response.status,
                from = connection.remote_address(),
                "Response from logic module"
            );
        }

        let Some(target) = response.head.source_address.clone() else {
            tracing::debug!(
                route = %response.head.cmd_merge,
                from = connection.remote_address(),
                "Dropping response without a source address"
            );
            return;
        };
        let Some(external) = self.balanced.external_balanced().get(&target) else {
            tracing::debug!(target = %target, "Dropping response for unknown external module");
            return;
        };
        if let Err(e) = external.send_response(response) {
            tracing::warn!(target = %external, error = %e, "Failed to return response");
            metrics::record_send_failure("response");
        }
    }
}

impl FrameHandler for GatewayProcessor {
    fn on_frame(&self, connection: &ConnectionRef, invoke_id: Option<u64>, frame: Frame) {
        match frame {
            Frame::Request(mut request) => {
                if request.head.source_address.is_none() {
                    let source = self
                        .sessions
                        .get(&connection.id())
                        .filter(|s| s.kind == ModuleKind::External)
                        .map(|s| s.address.clone());
                    request.head.source_address = source;
                }
                self.router.route(request, connection.as_ref());
            }
            Frame::Response(response) => self.on_response(connection, response),
            Frame::ModuleRegister(info) => self.on_register(connection, invoke_id, info),
            Frame::ModuleRegisterAck { .. } => {
                tracing::debug!(remote = connection.remote_address(), "Ignoring registration ack on gateway");
            }
        }
    }

    fn on_event(&self, event: ConnectionEvent, connection: &ConnectionRef) {
        let connection_id = connection.id();
        match event {
            ConnectionEvent::Connect => {
                self.connections.insert(connection_id, Arc::clone(connection));
                tracing::debug!(connection_id = %connection_id, remote = connection.remote_address(), "Module connected");
            }
            ConnectionEvent::Exception => {
                let session = self.sessions.get(&connection_id).map(|s| s.value().clone());
                if let Some(session) = session {
                    self.balanced
                        .mark_disconnected(session.kind, &session.address, connection_id);
                }
            }
            ConnectionEvent::Close => {
                self.connections.remove(&connection_id);
                if let Some((_, session)) = self.sessions.remove(&connection_id) {
                    self.balanced
                        .remove_connection(session.kind, &session.address, connection_id);
                }
                tracing::debug!(connection_id = %connection_id, remote = connection.remote_address(), "Module disconnected");
            }
        }
    }
}
