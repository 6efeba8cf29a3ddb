//! Module-side registry of gateway connections.
//!
//! # Responsibilities
//! - Connect and register with every known gateway address
//! - Keep a selector snapshot over the ACTIVE connections
//! - Flip a connection to DISCONNECT when its transport fails or closes
//!
//! # Design Decisions
//! - Writers are serialised and rebuild the snapshot from the full map
//! - Readers pick from the current snapshot without locking
//! - Connection handlers hold the registry weakly; no item points back at the manager

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use thiserror::Error;

use crate::client::dispatch::{Dispatch, NoDispatch};
use crate::client::item::{BrokerClientItem, ItemRef};
use crate::config::GatewayConfig;
use crate::load_balancer::{BoxSelector, SelectorError, SelectorStrategy, SharedSelectorFactory};
use crate::net::{ConnectionEvent, ConnectionRef, ConnectionStatus, Connector, FrameHandler, TransportError};
use crate::observability::metrics;
use crate::protocol::{Frame, ModuleInfo, RequestMessage};

/// Client-side failures.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to gateway {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("registration with gateway {address} failed: {source}")]
    Register {
        address: String,
        #[source]
        source: TransportError,
    },

    #[error("no active gateway connection")]
    NoActiveConnection,

    #[error("send to gateway failed: {0}")]
    Send(#[from] TransportError),
}

/// Items keyed by gateway address plus the snapshot built from them.
pub(crate) struct ItemRegistry {
    items: DashMap<String, ItemRef>,
    selector: ArcSwap<BoxSelector<ItemRef>>,
    factory: SharedSelectorFactory<ItemRef>,
    write_lock: Mutex<()>,
    open_log: bool,
}

impl ItemRegistry {
    fn new(factory: SharedSelectorFactory<ItemRef>, open_log: bool) -> Self {
        Self {
            items: DashMap::new(),
            selector: ArcSwap::from_pointee(factory.create(Vec::new())),
            factory,
            write_lock: Mutex::new(()),
            open_log,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, item: ItemRef) -> Option<ItemRef> {
        let _guard = self.lock();
        let previous = self.items.insert(item.address().to_string(), item);
        self.reset_selector();
        previous
    }

    fn remove(&self, address: &str) -> Option<ItemRef> {
        let _guard = self.lock();
        let removed = self.items.remove(address).map(|(_, item)| item);
        self.reset_selector();
        removed
    }

    /// Status-only removal: the item stays known but leaves the snapshot.
    fn disconnect(&self, item: &BrokerClientItem) -> bool {
        let _guard = self.lock();
        let was_active = item.set_status(ConnectionStatus::Disconnect) == ConnectionStatus::Active;
        self.reset_selector();
        was_active
    }

    /// Must be called with the write lock held.
    fn reset_selector(&self) {
        let mut active: Vec<ItemRef> = self
            .items
            .iter()
            .filter(|item| item.is_active())
            .map(|item| Arc::clone(item.value()))
            .collect();
        active.sort_by(|a, b| a.address().cmp(b.address()));

        metrics::record_active_gateways(active.len());
        self.selector.store(Arc::new(self.factory.create(active)));
    }

    fn next(&self) -> Result<ItemRef, SelectorError> {
        self.selector.load().next()
    }
}

/// Transport callbacks for one item's connection.
struct ItemHandler {
    item: Weak<BrokerClientItem>,
    registry: Weak<ItemRegistry>,
}

impl FrameHandler for ItemHandler {
    fn on_frame(&self, connection: &ConnectionRef, _invoke_id: Option<u64>, frame: Frame) {
        let Some(item) = self.item.upgrade() else {
            return;
        };
        match frame {
            Frame::Request(request) => item.handle_request(request),
            Frame::Response(response) => {
                tracing::debug!(
                    gateway = connection.remote_address(),
                    route = %response.head.cmd_merge,
                    status = ?response.status,
                    "Response from gateway"
                );
            }
            other => {
                tracing::debug!(gateway = connection.remote_address(), frame = other.name(), "Ignoring frame");
            }
        }
    }

    fn on_event(&self, event: ConnectionEvent, connection: &ConnectionRef) {
        if event == ConnectionEvent::Connect {
            tracing::debug!(gateway = connection.remote_address(), "Connected to gateway");
            return;
        }
        let (Some(item), Some(registry)) = (self.item.upgrade(), self.registry.upgrade()) else {
            return;
        };
        if registry.disconnect(&item) && registry.open_log {
            tracing::info!(gateway = %item.address(), event = ?event, "Gateway connection lost");
        }
    }
}

/// Builder for [`BrokerClientManager`].
pub struct BrokerClientManagerBuilder {
    module: ModuleInfo,
    connector: Arc<dyn Connector>,
    dispatch: Arc<dyn Dispatch>,
    factory: SharedSelectorFactory<ItemRef>,
    request_timeout: Duration,
    open_log: bool,
}

impl BrokerClientManagerBuilder {
    /// Context that serves requests forwarded to this module.
    pub fn dispatch(mut self, dispatch: Arc<dyn Dispatch>) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn strategy(mut self, strategy: SelectorStrategy) -> Self {
        self.factory = strategy.into_factory();
        self
    }

    pub fn selector_factory(mut self, factory: SharedSelectorFactory<ItemRef>) -> Self {
        self.factory = factory;
        self
    }

    /// Bound on the registration handshake.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn open_log(mut self, open_log: bool) -> Self {
        self.open_log = open_log;
        self
    }

    pub fn build(self) -> BrokerClientManager {
        BrokerClientManager {
            registry: Arc::new(ItemRegistry::new(self.factory, self.open_log)),
            connector: self.connector,
            dispatch: self.dispatch,
            module: self.module,
            request_timeout: self.request_timeout,
        }
    }
}

/// A module's view of the gateways it is registered with.
pub struct BrokerClientManager {
    registry: Arc<ItemRegistry>,
    connector: Arc<dyn Connector>,
    dispatch: Arc<dyn Dispatch>,
    module: ModuleInfo,
    request_timeout: Duration,
}

impl BrokerClientManager {
    pub fn builder(module: ModuleInfo, connector: Arc<dyn Connector>) -> BrokerClientManagerBuilder {
        BrokerClientManagerBuilder {
            module,
            connector,
            dispatch: Arc::new(NoDispatch),
            factory: SelectorStrategy::default().into_factory(),
            request_timeout: Duration::from_secs(5),
            open_log: true,
        }
    }

    /// Manager configured from the `[client]`, `[balancer]`, `[transport]`
    /// and `[observability]` sections.
    pub fn from_config(config: &GatewayConfig, connector: Arc<dyn Connector>, dispatch: Arc<dyn Dispatch>) -> Self {
        Self::builder(config.client.module_info(), connector)
            .dispatch(dispatch)
            .strategy(config.balancer.strategy)
            .request_timeout(config.transport.request_timeout())
            .open_log(config.observability.open_log)
            .build()
    }

    pub fn module_info(&self) -> &ModuleInfo {
        &self.module
    }

    /// Register with every address in `addresses`.
    ///
    /// Failures are logged and returned; the other addresses still register.
    pub async fn init<S: AsRef<str>>(&self, addresses: &[S]) -> Vec<ClientError> {
        let mut failures = Vec::new();
        for address in addresses {
            if let Err(e) = self.register(address.as_ref()).await {
                tracing::warn!(error = %e, "Gateway registration failed");
                failures.push(e);
            }
        }
        failures
    }

    /// Connect to the gateway at `address`, announce this module and add
    /// the connection to the selector once acknowledged.
    ///
    /// Registering an address again replaces and closes the previous item.
    pub async fn register(&self, address: &str) -> Result<ItemRef, ClientError> {
        let item = Arc::new(BrokerClientItem::new(
            address.to_string(),
            Arc::clone(&self.dispatch),
            self.request_timeout,
        ));
        let handler = Arc::new(ItemHandler {
            item: Arc::downgrade(&item),
            registry: Arc::downgrade(&self.registry),
        });

        let connection = self
            .connector
            .connect(address, handler)
            .await
            .map_err(|source| ClientError::Connect {
                address: address.to_string(),
                source,
            })?;
        item.attach(connection);

        if let Err(source) = item.handshake(self.module.clone()).await {
            item.close();
            return Err(ClientError::Register {
                address: address.to_string(),
                source,
            });
        }

        if let Some(previous) = self.registry.insert(Arc::clone(&item)) {
            previous.close();
        }
        if self.registry.open_log {
            tracing::info!(
                gateway = %address,
                broker_id = item.broker_id().unwrap_or_default(),
                active = self.count_active(),
                "Registered with gateway"
            );
        }
        Ok(item)
    }

    /// Forget the gateway at `address` and close its connection.
    pub fn remove(&self, address: &str) -> Option<ItemRef> {
        let removed = self.registry.remove(address)?;
        removed.close();
        if self.registry.open_log {
            tracing::info!(gateway = %address, remaining = self.len(), "Gateway removed");
        }
        Some(removed)
    }

    /// Mark `item` DISCONNECT without forgetting its address.
    ///
    /// Returns `true` if the item was active.
    pub fn remove_item(&self, item: &BrokerClientItem) -> bool {
        self.registry.disconnect(item)
    }

    /// Pick an active gateway connection.
    pub fn next(&self) -> Result<ItemRef, ClientError> {
        self.registry
            .next()
            .map_err(|SelectorError::Empty| ClientError::NoActiveConnection)
    }

    /// Send `request` through any active gateway.
    pub fn send_request(&self, request: RequestMessage) -> Result<(), ClientError> {
        self.next()?.send_request(request)?;
        Ok(())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.registry.items.contains_key(address)
    }

    pub fn get(&self, address: &str) -> Option<ItemRef> {
        self.registry.items.get(address).map(|item| Arc::clone(item.value()))
    }

    /// Number of ACTIVE items.
    pub fn count_active(&self) -> usize {
        self.registry.items.iter().filter(|item| item.is_active()).count()
    }

    /// Known gateway addresses, any status.
    pub fn len(&self) -> usize {
        self.registry.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.items.is_empty()
    }

    pub fn key_set(&self) -> HashSet<String> {
        self.registry.items.iter().map(|item| item.key().clone()).collect()
    }

    pub fn list_items(&self) -> Vec<ItemRef> {
        self.registry.items.iter().map(|item| Arc::clone(item.value())).collect()
    }

    /// Visit every item, any status. The closure may call back into the manager.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&ItemRef),
    {
        for item in self.list_items() {
            f(&item);
        }
    }

    /// Close every connection and forget all gateways.
    pub fn shutdown(&self) {
        for address in self.key_set() {
            self.remove(&address);
        }
    }
}

impl std::fmt::Debug for BrokerClientManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClientManager")
            .field("module", &self.module.id)
            .field("gateways", &self.len())
            .field("active", &self.count_active())
            .finish()
    }
}
