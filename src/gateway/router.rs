//! Request routing.
//!
//! # Responsibilities
//! - Resolve a request's route key to one logic module
//! - Forward the request one-way to that module
//! - Answer the originator with ROUTE_NOT_FOUND when no module serves the key
//!
//! # Design Decisions
//! - Routing never waits: a forward is fire-and-forget
//! - Send failures are logged and counted, never propagated to the caller

use std::sync::Arc;

use crate::load_balancer::{BalancedManager, RouteError};
use crate::net::Connection;
use crate::observability::metrics;
use crate::protocol::{Frame, RequestMessage, StatusCode};

/// Result of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the logic module at `address`.
    Forwarded { address: String },
    /// A module was selected but the send to it failed.
    ForwardFailed { address: String },
    /// No module serves the key; the originator was told so.
    NotFound(RouteError),
}

impl RouteOutcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, RouteOutcome::Forwarded { .. })
    }
}

/// Routes external requests to logic modules.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    balanced: Arc<BalancedManager>,
    request_response_log: bool,
}

impl RequestRouter {
    pub fn new(balanced: Arc<BalancedManager>, request_response_log: bool) -> Self {
        Self {
            balanced,
            request_response_log,
        }
    }

    /// Route `request` that arrived on `origin`.
    pub fn route(&self, mut request: RequestMessage, origin: &dyn Connection) -> RouteOutcome {
        if self.request_response_log {
            self.log_request(&request, origin);
        }

        let route_key = request.route_key();
        match self.balanced.logic_balanced().lookup(route_key) {
            Ok(proxy) => {
                let address = proxy.address().to_string();
                match proxy.oneway(request) {
                    Ok(()) => {
                        metrics::record_routed();
                        RouteOutcome::Forwarded { address }
                    }
                    Err(e) => {
                        tracing::error!(
                            route = %route_key,
                            target = %proxy,
                            error = %e,
                            "Failed to forward request"
                        );
                        metrics::record_send_failure("forward");
                        RouteOutcome::ForwardFailed { address }
                    }
                }
            }
            Err(err) => {
                let response = request.fail_with(StatusCode::RouteNotFound);
                metrics::record_route_not_found();
                tracing::debug!(route = %route_key, reason = %err, origin = origin.remote_address(), "Route not found");

                if let Err(e) = origin.send_oneway(Frame::Response(response)) {
                    tracing::warn!(
                        route = %route_key,
                        origin = origin.remote_address(),
                        error = %e,
                        "Failed to deliver route-not-found response"
                    );
                    metrics::record_send_failure("not_found");
                }
                RouteOutcome::NotFound(err)
            }
        }
    }

    fn log_request(&self, request: &RequestMessage, origin: &dyn Connection) {
        let externals: Vec<String> = self
            .balanced
            .external_balanced()
            .list_proxies()
            .iter()
            .map(|p| p.to_string())
            .collect();
        tracing::info!(
            route = %request.route_key(),
            msg_id = request.head.msg_id,
            origin = origin.remote_address(),
            payload_bytes = request.data.len(),
            external_modules = ?externals,
            "Routing request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::SelectorStrategy;
    use crate::net::memory::MemoryConnection;
    use crate::protocol::{HeadMetadata, ModuleInfo, ModuleKind, RouteKey};

    const KEY: RouteKey = RouteKey::merge(1, 5);

    fn request(key: RouteKey) -> RequestMessage {
        RequestMessage::new(HeadMetadata::new(key, 7), b"hello".to_vec())
    }

    fn logic(address: &str) -> ModuleInfo {
        ModuleInfo {
            id: address.to_string(),
            address: address.to_string(),
            kind: ModuleKind::Logic,
            route_keys: vec![KEY],
        }
    }

    #[test]
    fn forwards_to_registered_module() {
        let balanced = Arc::new(BalancedManager::new(SelectorStrategy::Random, false));
        let logic_conn = MemoryConnection::new("10.0.0.1:9000");
        balanced.register(logic("10.0.0.1:9000"), logic_conn.clone());
        let router = RequestRouter::new(balanced, true);
        let origin = MemoryConnection::new("10.0.1.1:10100");

        let outcome = router.route(request(KEY), origin.as_ref());

        assert_eq!(
            outcome,
            RouteOutcome::Forwarded {
                address: "10.0.0.1:9000".into()
            }
        );
        assert_eq!(logic_conn.sent_frames(), vec![Frame::Request(request(KEY))]);
        assert_eq!(origin.sent_count(), 0);
    }

    #[test]
    fn unknown_key_answers_origin_with_route_not_found() {
        let balanced = Arc::new(BalancedManager::new(SelectorStrategy::Random, false));
        let router = RequestRouter::new(balanced, false);
        let origin = MemoryConnection::new("10.0.1.1:10100");
        let unknown = RouteKey::merge(9, 9);

        let outcome = router.route(request(unknown), origin.as_ref());

        assert_eq!(outcome, RouteOutcome::NotFound(RouteError::NoRegion(unknown)));
        let sent = origin.sent_frames();
        assert_eq!(sent.len(), 1);
        let Frame::Response(response) = &sent[0] else {
            panic!("expected a response, got {:?}", sent[0]);
        };
        assert_eq!(response.status, StatusCode::RouteNotFound);
        assert_eq!(response.head.msg_id, 7);
        assert_eq!(response.validator_msg.as_deref(), Some("route not found"));
    }

    #[test]
    fn failed_forward_is_swallowed() {
        let balanced = Arc::new(BalancedManager::new(SelectorStrategy::Random, false));
        let logic_conn = MemoryConnection::new("10.0.0.1:9000");
        logic_conn.set_fail_sends(true);
        balanced.register(logic("10.0.0.1:9000"), logic_conn);
        let router = RequestRouter::new(balanced, false);
        let origin = MemoryConnection::new("10.0.1.1:10100");

        let outcome = router.route(request(KEY), origin.as_ref());

        assert_eq!(
            outcome,
            RouteOutcome::ForwardFailed {
                address: "10.0.0.1:9000".into()
            }
        );
        assert_eq!(origin.sent_count(), 0);
    }

    #[test]
    fn undeliverable_not_found_is_swallowed() {
        let balanced = Arc::new(BalancedManager::new(SelectorStrategy::Random, false));
        let router = RequestRouter::new(balanced, false);
        let origin = MemoryConnection::new("10.0.1.1:10100");
        origin.close();

        let outcome = router.route(request(KEY), origin.as_ref());
        assert!(matches!(outcome, RouteOutcome::NotFound(_)));
    }
}
