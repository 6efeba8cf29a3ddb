//! A module process that registers with one or more gateways.
//!
//! Logic modules answer forwarded requests by echoing the payload; external
//! modules only hold their gateway connections.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use broker_gateway::client::{BrokerClientManager, Dispatch, NoDispatch};
use broker_gateway::config::loader::load_config;
use broker_gateway::config::validation::validate_client;
use broker_gateway::config::GatewayConfig;
use broker_gateway::lifecycle::signals;
use broker_gateway::net::TcpConnector;
use broker_gateway::observability::logging;
use broker_gateway::protocol::{ModuleKind, RequestMessage, ResponseMessage};

#[derive(Parser)]
#[command(name = "broker-module")]
#[command(about = "Register a module with broker gateways", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gateway address; repeat for several. Replaces `client.gateway_addresses`.
    #[arg(short, long)]
    gateway: Vec<String>,
}

fn echo(request: RequestMessage) -> ResponseMessage {
    let data = request.data.clone();
    request.create_response().with_data(data)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if !cli.gateway.is_empty() {
        config.client.gateway_addresses = cli.gateway;
    }
    if let Err(errors) = validate_client(&config) {
        let joined = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        return Err(format!("invalid client configuration: {joined}").into());
    }

    logging::init(&config.observability, module_path!());

    let dispatch: Arc<dyn Dispatch> = match config.client.kind {
        ModuleKind::Logic => Arc::new(echo),
        ModuleKind::External => Arc::new(NoDispatch),
    };
    let connector = Arc::new(TcpConnector::new(
        config.transport.connect_timeout(),
        config.transport.max_frame_bytes,
    ));
    let manager = BrokerClientManager::from_config(&config, connector, dispatch);

    let failures = manager.init(&config.client.gateway_addresses).await;
    tracing::info!(
        module = %manager.module_info().id,
        kind = %manager.module_info().kind,
        registered = manager.count_active(),
        failed = failures.len(),
        "Module started"
    );

    let signal = signals::wait_for_signal().await;
    tracing::info!(signal, "Termination signal received, closing gateway connections");
    manager.shutdown();
    Ok(())
}
