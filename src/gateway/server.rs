//! Broker server: the gateway process.
//!
//! # Responsibilities
//! - Own the balanced manager and the inbound frame processor
//! - Accept module connections and hand them to the processor
//! - Stop accepting on shutdown, close connections, wait for drain

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::gateway::processor::GatewayProcessor;
use crate::load_balancer::{BalancedManager, ProxyRef, SharedSelectorFactory};
use crate::net::{Accepted, ConnectionTracker, FrameHandler, Listener, ListenerError, TcpConnection};

/// Builder for [`BrokerServer`].
pub struct BrokerServerBuilder {
    config: GatewayConfig,
    broker_id: Option<String>,
    factory: Option<SharedSelectorFactory<ProxyRef>>,
}

impl BrokerServerBuilder {
    /// Override the configured broker id.
    pub fn broker_id(mut self, broker_id: impl Into<String>) -> Self {
        self.broker_id = Some(broker_id.into());
        self
    }

    /// Use a custom selector instead of the configured strategy.
    pub fn selector_factory(mut self, factory: SharedSelectorFactory<ProxyRef>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn build(self) -> BrokerServer {
        let broker_id = self
            .broker_id
            .or_else(|| self.config.gateway.broker_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let open_log = self.config.observability.open_log;
        let factory = self
            .factory
            .unwrap_or_else(|| self.config.balancer.strategy.into_factory());
        let balanced = Arc::new(BalancedManager::with_factory(factory, open_log));
        let processor = Arc::new(GatewayProcessor::new(
            broker_id.clone(),
            Arc::clone(&balanced),
            self.config.observability.request_response_log,
        ));

        BrokerServer {
            broker_id,
            config: self.config,
            balanced,
            processor,
            tracker: ConnectionTracker::new(),
        }
    }
}

/// The gateway: accepts module connections and routes between them.
pub struct BrokerServer {
    broker_id: String,
    config: GatewayConfig,
    balanced: Arc<BalancedManager>,
    processor: Arc<GatewayProcessor>,
    tracker: ConnectionTracker,
}

impl BrokerServer {
    pub fn builder(config: GatewayConfig) -> BrokerServerBuilder {
        BrokerServerBuilder {
            config,
            broker_id: None,
            factory: None,
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    pub fn balanced_manager(&self) -> &Arc<BalancedManager> {
        &self.balanced
    }

    pub fn processor(&self) -> &Arc<GatewayProcessor> {
        &self.processor
    }

    /// Inbound connections still open.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Bind the configured listener address.
    pub async fn bind(&self) -> Result<Listener, ListenerError> {
        Listener::bind(&self.config.listener, self.tracker.clone()).await
    }

    /// Accept connections on `listener` until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), ListenerError> {
        let local_addr = listener.local_addr();
        tracing::info!(
            address = %local_addr,
            broker_id = %self.broker_id,
            strategy = ?self.config.balancer.strategy,
            "Gateway starting"
        );

        let handler: Arc<dyn FrameHandler> = self.processor.clone();
        let max_frame_bytes = self.config.transport.max_frame_bytes;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(Accepted { stream, peer, guard }) => {
                        TcpConnection::spawn(stream, peer.to_string(), Arc::clone(&handler), max_frame_bytes, guard);
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                    Err(e) => return Err(e),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        drop(listener);
        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        let grace = Duration::from_secs(self.config.gateway.shutdown_grace_secs);
        self.processor.close_all();
        if self.tracker.wait_for_drain(grace).await {
            tracing::info!("All connections drained");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                grace_secs = grace.as_secs(),
                "Connections still open after grace period"
            );
        }
        tracing::info!(broker_id = %self.broker_id, "Gateway stopped");
    }
}

impl std::fmt::Debug for BrokerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerServer")
            .field("broker_id", &self.broker_id)
            .field("bind_address", &self.config.listener.bind_address)
            .field("balanced", &self.balanced)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_id_prefers_builder_then_config_then_uuid() {
        let mut config = GatewayConfig::default();
        config.gateway.broker_id = Some("from-config".into());

        let server = BrokerServer::builder(config.clone()).broker_id("explicit").build();
        assert_eq!(server.broker_id(), "explicit");

        let server = BrokerServer::builder(config).build();
        assert_eq!(server.broker_id(), "from-config");

        let server = BrokerServer::builder(GatewayConfig::default()).build();
        assert!(Uuid::parse_str(server.broker_id()).is_ok());
    }

    #[tokio::test]
    async fn run_returns_after_shutdown() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "127.0.0.1:0".into();
        config.gateway.shutdown_grace_secs = 1;
        let server = BrokerServer::builder(config).build();
        let listener = server.bind().await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let task = tokio::spawn(server.run(listener, rx));
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
