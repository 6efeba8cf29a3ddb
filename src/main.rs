//! Broker gateway.
//!
//! Routes requests from external (client-facing) modules to logic modules
//! by route key, and carries responses back.
//!
//! ```text
//!   external module                 gateway                      logic modules
//!  ┌───────────────┐  request  ┌──────────────────┐  one-way  ┌────────────────┐
//!  │ client-facing │──────────▶│ processor        │──────────▶│ 10.0.0.1:9000  │
//!  │   instance    │           │  → router        │           ├────────────────┤
//!  │               │◀──────────│  → region table  │           │ 10.0.0.2:9000  │
//!  └───────────────┘  response │  → selector      │◀──────────┴────────────────┘
//!                              └──────────────────┘  response
//! ```

use std::path::PathBuf;

use clap::Parser;

use broker_gateway::config::loader::load_config;
use broker_gateway::config::GatewayConfig;
use broker_gateway::load_balancer::SelectorStrategy;
use broker_gateway::lifecycle::startup;
use broker_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "broker-gateway")]
#[command(about = "Route-key gateway between external and logic modules", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// Override `balancer.strategy`.
    #[arg(long)]
    strategy: Option<SelectorStrategy>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if let Some(strategy) = cli.strategy {
        config.balancer.strategy = strategy;
    }

    logging::init(&config.observability, module_path!());
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        "broker-gateway starting"
    );

    startup::run(config).await?;
    Ok(())
}
