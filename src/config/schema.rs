//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway
//! and for modules connecting to it. All types derive Serde traits for
//! deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::load_balancer::SelectorStrategy;
use crate::net::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::protocol::{ModuleInfo, ModuleKind, RouteKey};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway identity and shutdown behaviour.
    pub gateway: BrokerConfig,

    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Selection strategy for every pool.
    pub balancer: BalancerConfig,

    /// Connect/request timeouts and frame limits.
    pub transport: TransportConfig,

    /// Settings for a module connecting to gateways.
    pub client: ClientConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Gateway identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Gateway id. A random UUID is assigned when absent.
    pub broker_id: Option<String>,

    /// How long shutdown waits for open connections to drain.
    pub shutdown_grace_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_id: None,
            shutdown_grace_secs: 5,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:10200").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:10200".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Load balancing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// `random` (default) or `round_robin`.
    pub strategy: SelectorStrategy,
}

/// Transport timeouts and limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Outbound connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Timeout for correlated calls (registration handshake) in milliseconds.
    pub request_timeout_ms: u64,

    /// Largest accepted packet body in bytes.
    pub max_frame_bytes: usize,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            request_timeout_ms: 5_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// A served route, written as module and command ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteConfig {
    pub module_id: u16,
    pub command_id: u16,
}

impl RouteConfig {
    pub fn route_key(&self) -> RouteKey {
        RouteKey::merge(self.module_id, self.command_id)
    }
}

/// Settings for a module that connects to one or more gateways.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateways to connect to at startup (`host:port`).
    pub gateway_addresses: Vec<String>,

    /// Module instance id.
    pub module_id: String,

    /// Address this module advertises to gateways.
    pub advertised_address: String,

    /// Pool the module joins on the gateway.
    pub kind: ModuleKind,

    /// Routes served (logic modules only).
    pub routes: Vec<RouteConfig>,
}

impl ClientConfig {
    /// Registration payload sent to every gateway.
    pub fn module_info(&self) -> ModuleInfo {
        ModuleInfo {
            id: self.module_id.clone(),
            address: self.advertised_address.clone(),
            kind: self.kind,
            route_keys: self.routes.iter().map(RouteConfig::route_key).collect(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_addresses: vec!["127.0.0.1:10200".to_string()],
            module_id: "logic-1".to_string(),
            advertised_address: "127.0.0.1:10300".to_string(),
            kind: ModuleKind::Logic,
            routes: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log membership changes (registrations, removals, disconnects).
    pub open_log: bool,

    /// Log every routed request together with the external pool.
    pub request_response_log: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            open_log: true,
            request_response_log: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
