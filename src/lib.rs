//! Gateway routing and load-balancing core.
//!
//! - [`gateway`]: the broker server, routing external requests to logic modules
//! - [`client`]: the module side, one connection per gateway
//! - [`load_balancer`]: region table, proxy pools and pluggable selectors

pub mod client;
pub mod cluster;
pub mod config;
pub mod gateway;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod protocol;

pub use client::BrokerClientManager;
pub use config::GatewayConfig;
pub use gateway::BrokerServer;
pub use lifecycle::Shutdown;
pub use load_balancer::BalancedManager;
