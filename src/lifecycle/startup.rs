//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when enabled
//! - Build the broker server and bind its listener
//! - Run until a termination signal, then drain
//!
//! # Design Decisions
//! - Fail fast: bind and address errors abort startup
//! - The listener binds last, after every subsystem exists

use std::net::{AddrParseError, SocketAddr};

use thiserror::Error;

use crate::config::GatewayConfig;
use crate::gateway::BrokerServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::net::ListenerError;
use crate::observability::metrics;

/// Errors that stop the gateway from starting or running.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid metrics address '{address}': {source}")]
    MetricsAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Run a gateway from `config` until SIGINT/SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));
    run_until(config, &shutdown).await
}

/// Run a gateway from `config` until `shutdown` fires.
pub async fn run_until(config: GatewayConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr: SocketAddr = address.parse().map_err(|source| StartupError::MetricsAddress {
            address: address.clone(),
            source,
        })?;
        metrics::init_metrics(addr);
    }

    let server = BrokerServer::builder(config).build();
    tracing::info!(
        broker_id = %server.broker_id(),
        strategy = ?server.config().balancer.strategy,
        open_log = server.config().observability.open_log,
        "Gateway configured"
    );

    let listener = server.bind().await?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bad_metrics_address_fails_fast() {
        let mut config = GatewayConfig::default();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "not-an-address".into();

        let err = run_until(config, &Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, StartupError::MetricsAddress { .. }));
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "256.0.0.1:0".into();

        let err = run_until(config, &Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, StartupError::Listener(ListenerError::InvalidAddress { .. })));
    }
}
