//! Proxy pools and the gateway's balanced manager.
//!
//! # Responsibilities
//! - `ProxySet`: address-keyed proxies plus the selector snapshot built from them
//! - `ExternalPool`: flat pool of external (client-facing) modules
//! - `BalancedManager`: owns the logic region table and the external pool

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::load_balancer::proxy::BrokerClientProxy;
use crate::load_balancer::region::RegionTable;
use crate::load_balancer::selector::{BoxSelector, SelectorError, SelectorStrategy, SharedSelectorFactory};
use crate::net::connection::ConnectionId;
use crate::net::transport::ConnectionRef;
use crate::observability::metrics;
use crate::protocol::{ModuleInfo, ModuleKind};

/// Shared proxy handle.
pub type ProxyRef = Arc<BrokerClientProxy>;

/// Address-keyed proxies with an atomically swapped selector snapshot.
///
/// Callers serialise `insert`/`remove`/`rebuild`; `next` is lock-free.
pub(crate) struct ProxySet {
    proxies: DashMap<String, ProxyRef>,
    selector: ArcSwap<BoxSelector<ProxyRef>>,
}

impl ProxySet {
    pub(crate) fn new(factory: &SharedSelectorFactory<ProxyRef>) -> Self {
        Self {
            proxies: DashMap::new(),
            selector: ArcSwap::from_pointee(factory.create(Vec::new())),
        }
    }

    pub(crate) fn insert(&self, proxy: ProxyRef) -> Option<ProxyRef> {
        self.proxies.insert(proxy.address().to_string(), proxy)
    }

    pub(crate) fn remove(&self, address: &str) -> Option<ProxyRef> {
        self.proxies.remove(address).map(|(_, proxy)| proxy)
    }

    pub(crate) fn get(&self, address: &str) -> Option<ProxyRef> {
        self.proxies.get(address).map(|p| Arc::clone(p.value()))
    }

    pub(crate) fn contains(&self, address: &str) -> bool {
        self.proxies.contains_key(address)
    }

    pub(crate) fn len(&self) -> usize {
        self.proxies.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub(crate) fn list(&self) -> Vec<ProxyRef> {
        self.proxies.iter().map(|p| Arc::clone(p.value())).collect()
    }

    /// Replace the snapshot with the active proxies ordered by address.
    /// Returns the number of candidates.
    pub(crate) fn rebuild(&self, factory: &SharedSelectorFactory<ProxyRef>) -> usize {
        let mut active: Vec<ProxyRef> = self
            .proxies
            .iter()
            .filter(|p| p.is_active())
            .map(|p| Arc::clone(p.value()))
            .collect();
        active.sort_by(|a, b| a.address().cmp(b.address()));

        let count = active.len();
        self.selector.store(Arc::new(factory.create(active)));
        count
    }

    pub(crate) fn next(&self) -> Result<ProxyRef, SelectorError> {
        self.selector.load().next()
    }

    pub(crate) fn candidates(&self) -> Vec<ProxyRef> {
        self.selector.load().elements().to_vec()
    }

    pub(crate) fn candidate_count(&self) -> usize {
        self.selector.load().len()
    }
}

/// Flat pool of external modules.
pub struct ExternalPool {
    set: ProxySet,
    factory: SharedSelectorFactory<ProxyRef>,
    write_lock: Mutex<()>,
}

impl ExternalPool {
    pub fn new(factory: SharedSelectorFactory<ProxyRef>) -> Self {
        Self {
            set: ProxySet::new(&factory),
            factory,
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace the proxy for its address (last write wins).
    pub fn register(&self, proxy: ProxyRef) -> Option<ProxyRef> {
        let _guard = self.lock();
        let previous = self.set.insert(proxy);
        self.set.rebuild(&self.factory);
        previous
    }

    pub fn remove(&self, address: &str) -> Option<ProxyRef> {
        let _guard = self.lock();
        let removed = self.set.remove(address)?;
        self.set.rebuild(&self.factory);
        Some(removed)
    }

    /// Remove the proxy for `address` only if it is still bound to `connection_id`.
    pub fn remove_connection(&self, address: &str, connection_id: ConnectionId) -> Option<ProxyRef> {
        let _guard = self.lock();
        self.set.get(address).filter(|p| p.connection_id() == connection_id)?;
        let removed = self.set.remove(address)?;
        self.set.rebuild(&self.factory);
        Some(removed)
    }

    /// Exclude the proxy from selection without forgetting it.
    pub fn mark_disconnected(&self, address: &str, connection_id: ConnectionId) -> bool {
        let _guard = self.lock();
        let changed = self
            .set
            .get(address)
            .filter(|p| p.connection_id() == connection_id)
            .is_some_and(|p| p.mark_disconnected());
        if changed {
            self.set.rebuild(&self.factory);
        }
        changed
    }

    /// Pick an active external module.
    pub fn next(&self) -> Result<ProxyRef, SelectorError> {
        self.set.next()
    }

    /// Every registered external module, active or not.
    pub fn list_proxies(&self) -> Vec<ProxyRef> {
        self.set.list()
    }

    pub fn get(&self, address: &str) -> Option<ProxyRef> {
        self.set.get(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.set.contains(address)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl std::fmt::Debug for ExternalPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalPool")
            .field("registered", &self.set.len())
            .field("candidates", &self.set.candidate_count())
            .finish()
    }
}

/// Owns the gateway's two independent registries.
#[derive(Debug)]
pub struct BalancedManager {
    logic: RegionTable,
    external: ExternalPool,
    open_log: bool,
}

impl BalancedManager {
    /// Build both pools with the same selection strategy.
    pub fn new(strategy: SelectorStrategy, open_log: bool) -> Self {
        Self::with_factory(strategy.into_factory(), open_log)
    }

    /// Build both pools with a custom selector factory.
    pub fn with_factory(factory: SharedSelectorFactory<ProxyRef>, open_log: bool) -> Self {
        Self {
            logic: RegionTable::new(Arc::clone(&factory)),
            external: ExternalPool::new(factory),
            open_log,
        }
    }

    pub fn logic_balanced(&self) -> &RegionTable {
        &self.logic
    }

    pub fn external_balanced(&self) -> &ExternalPool {
        &self.external
    }

    /// Register a module that announced itself on `connection`.
    pub fn register(&self, info: ModuleInfo, connection: ConnectionRef) -> ProxyRef {
        let proxy = Arc::new(BrokerClientProxy::new(info, connection));
        let kind = proxy.kind();
        let previous = match kind {
            ModuleKind::Logic => self.logic.register(Arc::clone(&proxy)),
            ModuleKind::External => self.external.register(Arc::clone(&proxy)),
        };

        if self.open_log {
            tracing::info!(
                kind = %kind,
                address = proxy.address(),
                route_keys = proxy.route_keys().len(),
                replaced = previous.is_some(),
                "Module registered"
            );
        }
        self.record_pool_size(kind);
        proxy
    }

    /// Remove `address` from the pool of `kind`.
    pub fn remove(&self, kind: ModuleKind, address: &str) -> Option<ProxyRef> {
        let removed = match kind {
            ModuleKind::Logic => self.logic.remove(address),
            ModuleKind::External => self.external.remove(address),
        };
        self.after_removal(kind, address, removed.is_some());
        removed
    }

    /// Remove `address` only if it is still served by `connection_id`.
    pub fn remove_connection(&self, kind: ModuleKind, address: &str, connection_id: ConnectionId) -> Option<ProxyRef> {
        let removed = match kind {
            ModuleKind::Logic => self.logic.remove_connection(address, connection_id),
            ModuleKind::External => self.external.remove_connection(address, connection_id),
        };
        self.after_removal(kind, address, removed.is_some());
        removed
    }

    /// Mark the proxy bound to `connection_id` DISCONNECT.
    pub fn mark_disconnected(&self, kind: ModuleKind, address: &str, connection_id: ConnectionId) -> bool {
        let changed = match kind {
            ModuleKind::Logic => self.logic.mark_disconnected(address, connection_id),
            ModuleKind::External => self.external.mark_disconnected(address, connection_id),
        };
        if changed && self.open_log {
            tracing::info!(kind = %kind, address, "Module excluded from selection");
        }
        changed
    }

    fn after_removal(&self, kind: ModuleKind, address: &str, removed: bool) {
        if !removed {
            return;
        }
        if self.open_log {
            tracing::info!(
                kind = %kind,
                address,
                remaining = self.pool_size(kind),
                "Module removed"
            );
        }
        self.record_pool_size(kind);
    }

    fn pool_size(&self, kind: ModuleKind) -> usize {
        match kind {
            ModuleKind::Logic => self.logic.len(),
            ModuleKind::External => self.external.len(),
        }
    }

    fn record_pool_size(&self, kind: ModuleKind) {
        metrics::record_registered_modules(kind, self.pool_size(kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::memory::MemoryConnection;
    use crate::protocol::RouteKey;

    fn info(address: &str, kind: ModuleKind) -> ModuleInfo {
        ModuleInfo {
            id: address.to_string(),
            address: address.to_string(),
            kind,
            route_keys: vec![RouteKey::merge(1, 1)],
        }
    }

    #[test]
    fn pools_are_independent() {
        let manager = BalancedManager::new(SelectorStrategy::Random, false);
        manager.register(info("10.0.0.1:9000", ModuleKind::Logic), MemoryConnection::new("10.0.0.1:9000"));
        manager.register(info("10.0.0.1:9000", ModuleKind::External), MemoryConnection::new("10.0.0.1:9000"));

        assert!(manager.remove(ModuleKind::External, "10.0.0.1:9000").is_some());
        assert!(manager.logic_balanced().lookup(RouteKey::merge(1, 1)).is_ok());
        assert!(manager.external_balanced().is_empty());
    }

    #[test]
    fn external_pool_ignores_route_keys_and_lists_all() {
        let manager = BalancedManager::new(SelectorStrategy::RoundRobin, true);
        manager.register(info("10.0.1.1:10100", ModuleKind::External), MemoryConnection::new("a"));
        manager.register(info("10.0.1.2:10100", ModuleKind::External), MemoryConnection::new("b"));

        let mut listed: Vec<_> = manager
            .external_balanced()
            .list_proxies()
            .iter()
            .map(|p| p.address().to_string())
            .collect();
        listed.sort();
        assert_eq!(listed, vec!["10.0.1.1:10100", "10.0.1.2:10100"]);
        assert!(manager.logic_balanced().route_keys().is_empty());
        assert_eq!(manager.external_balanced().next().unwrap().address(), "10.0.1.1:10100");
        assert_eq!(manager.external_balanced().next().unwrap().address(), "10.0.1.2:10100");
    }

    #[test]
    fn external_disconnect_then_stale_remove() {
        let pool = ExternalPool::new(SelectorStrategy::Random.into_factory());
        let conn = MemoryConnection::new("10.0.1.1:10100");
        let proxy = Arc::new(BrokerClientProxy::new(info("10.0.1.1:10100", ModuleKind::External), conn));
        let id = proxy.connection_id();
        pool.register(proxy);

        assert!(pool.mark_disconnected("10.0.1.1:10100", id));
        assert_eq!(pool.next().unwrap_err(), SelectorError::Empty);
        assert!(pool.remove_connection("10.0.1.1:10100", ConnectionId::new()).is_none());
        assert!(pool.remove_connection("10.0.1.1:10100", id).is_some());
        assert!(!pool.contains("10.0.1.1:10100"));
    }
}
