//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use broker_gateway::config::GatewayConfig;
use broker_gateway::gateway::BrokerServer;
use broker_gateway::load_balancer::BalancedManager;
use broker_gateway::net::memory::MemoryConnection;
use broker_gateway::net::{ConnectionRef, FrameHandler, ListenerError};
use broker_gateway::protocol::{Frame, HeadMetadata, ModuleInfo, ModuleKind, RequestMessage, ResponseMessage, RouteKey};
use broker_gateway::Shutdown;

pub fn logic_info(address: &str, route_keys: &[RouteKey]) -> ModuleInfo {
    ModuleInfo {
        id: format!("logic@{address}"),
        address: address.to_string(),
        kind: ModuleKind::Logic,
        route_keys: route_keys.to_vec(),
    }
}

pub fn external_info(address: &str) -> ModuleInfo {
    ModuleInfo {
        id: format!("external@{address}"),
        address: address.to_string(),
        kind: ModuleKind::External,
        route_keys: Vec::new(),
    }
}

pub fn request(route_key: RouteKey, msg_id: u32, data: &[u8]) -> RequestMessage {
    RequestMessage::new(HeadMetadata::new(route_key, msg_id), data.to_vec())
}

/// Register a logic module on an in-memory connection and return that connection.
pub fn register_logic(balanced: &BalancedManager, address: &str, route_keys: &[RouteKey]) -> Arc<MemoryConnection> {
    let connection = MemoryConnection::new(address);
    balanced.register(logic_info(address, route_keys), connection.clone());
    connection
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Frame handler forwarding every inbound frame to a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Frame>,
}

impl FrameHandler for Recorder {
    fn on_frame(&self, _connection: &ConnectionRef, _invoke_id: Option<u64>, frame: Frame) {
        let _ = self.tx.send(frame);
    }
}

pub fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), rx)
}

/// Next response frame, skipping anything else.
pub async fn next_response(rx: &mut mpsc::UnboundedReceiver<Frame>) -> ResponseMessage {
    let wait = async {
        loop {
            match rx.recv().await {
                Some(Frame::Response(response)) => return response,
                Some(_) => continue,
                None => panic!("connection handler dropped"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no response within 5s")
}

pub struct RunningGateway {
    pub address: SocketAddr,
    pub balanced: Arc<BalancedManager>,
    pub broker_id: String,
    pub shutdown: Shutdown,
    pub task: JoinHandle<Result<(), ListenerError>>,
}

/// Start a gateway on an ephemeral localhost port.
pub async fn start_gateway(mut config: GatewayConfig) -> RunningGateway {
    config.listener.bind_address = "127.0.0.1:0".into();
    config.gateway.shutdown_grace_secs = 1;

    let server = BrokerServer::builder(config).build();
    let listener = server.bind().await.unwrap();
    let address = listener.local_addr();
    let balanced = Arc::clone(server.balanced_manager());
    let broker_id = server.broker_id().to_string();

    let shutdown = Shutdown::new();
    let task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    RunningGateway {
        address,
        balanced,
        broker_id,
        shutdown,
        task,
    }
}
