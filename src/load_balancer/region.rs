//! Region table: logic modules partitioned by route key.
//!
//! # Responsibilities
//! - Keep one [`Region`] per route key with at least one registered proxy
//! - Replace a module's proxy when its address registers again
//! - Answer `lookup(route_key)` without blocking on writers

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use thiserror::Error;

use crate::load_balancer::pool::{ProxyRef, ProxySet};
use crate::load_balancer::selector::{SelectorError, SharedSelectorFactory};
use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::protocol::RouteKey;

/// Routing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Nothing was ever registered for the key, or everything was removed.
    #[error("no region for route {0}")]
    NoRegion(RouteKey),
    /// The region exists but none of its proxies is active.
    #[error("no active candidate for route {0}")]
    NoCandidate(RouteKey),
}

impl RouteError {
    pub fn route_key(&self) -> RouteKey {
        match self {
            RouteError::NoRegion(key) | RouteError::NoCandidate(key) => *key,
        }
    }
}

/// All proxies registered for one route key.
pub struct Region {
    route_key: RouteKey,
    set: ProxySet,
}

impl Region {
    fn new(route_key: RouteKey, factory: &SharedSelectorFactory<ProxyRef>) -> Self {
        Self {
            route_key,
            set: ProxySet::new(factory),
        }
    }

    pub fn route_key(&self) -> RouteKey {
        self.route_key
    }

    /// Pick a proxy from the current snapshot.
    pub fn next(&self) -> Result<ProxyRef, SelectorError> {
        self.set.next()
    }

    /// Proxies in the current snapshot.
    pub fn candidates(&self) -> Vec<ProxyRef> {
        self.set.candidates()
    }

    /// Registered proxies, active or not.
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.set.contains(address)
    }

    fn rebuild(&self, factory: &SharedSelectorFactory<ProxyRef>) {
        let candidates = self.set.rebuild(factory);
        metrics::record_region_candidates(self.route_key, candidates);
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("route_key", &self.route_key)
            .field("registered", &self.set.len())
            .field("candidates", &self.set.candidate_count())
            .finish()
    }
}

/// Route key → [`Region`] table for logic modules.
pub struct RegionTable {
    regions: DashMap<RouteKey, Arc<Region>>,
    /// Address → proxy, one entry per registered module.
    proxies: DashMap<String, ProxyRef>,
    factory: SharedSelectorFactory<ProxyRef>,
    /// Serialises mutate+rebuild so an older snapshot never overwrites a newer one.
    write_lock: Mutex<()>,
}

impl RegionTable {
    pub fn new(factory: SharedSelectorFactory<ProxyRef>) -> Self {
        Self {
            regions: DashMap::new(),
            proxies: DashMap::new(),
            factory,
            write_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `proxy` under every route key it carries.
    ///
    /// A proxy already registered for the same address is replaced
    /// (last write wins) and returned.
    pub fn register(&self, proxy: ProxyRef) -> Option<ProxyRef> {
        let _guard = self.lock();
        let address = proxy.address().to_string();
        let mut touched = BTreeSet::new();

        let previous = self.proxies.insert(address.clone(), Arc::clone(&proxy));
        if let Some(previous) = &previous {
            for key in previous.route_keys() {
                if let Some(region) = self.region(*key) {
                    region.set.remove(&address);
                }
                touched.insert(*key);
            }
        }

        for key in proxy.route_keys() {
            let region = self
                .regions
                .entry(*key)
                .or_insert_with(|| Arc::new(Region::new(*key, &self.factory)))
                .value()
                .clone();
            region.set.insert(Arc::clone(&proxy));
            touched.insert(*key);
        }

        for key in touched {
            self.refresh(key);
        }
        previous
    }

    /// Remove the proxy for `address` from every region it belongs to.
    pub fn remove(&self, address: &str) -> Option<ProxyRef> {
        let _guard = self.lock();
        self.remove_locked(address)
    }

    /// Remove the proxy for `address` only if it is still bound to `connection_id`.
    pub fn remove_connection(&self, address: &str, connection_id: ConnectionId) -> Option<ProxyRef> {
        let _guard = self.lock();
        if !self.bound_to(address, connection_id) {
            return None;
        }
        self.remove_locked(address)
    }

    /// Exclude the proxy from selection without forgetting it.
    ///
    /// Returns `true` if the proxy bound to `connection_id` was active.
    pub fn mark_disconnected(&self, address: &str, connection_id: ConnectionId) -> bool {
        let _guard = self.lock();
        let Some(proxy) = self.bound_proxy(address, connection_id) else {
            return false;
        };
        if !proxy.mark_disconnected() {
            return false;
        }
        for key in proxy.route_keys() {
            self.refresh(*key);
        }
        true
    }

    /// Pick a proxy for `route_key`.
    pub fn lookup(&self, route_key: RouteKey) -> Result<ProxyRef, RouteError> {
        let region = self.region(route_key).ok_or(RouteError::NoRegion(route_key))?;
        region.next().map_err(|SelectorError::Empty| RouteError::NoCandidate(route_key))
    }

    pub fn region(&self, route_key: RouteKey) -> Option<Arc<Region>> {
        self.regions.get(&route_key).map(|r| Arc::clone(r.value()))
    }

    /// Proxies currently selectable for `route_key`.
    pub fn candidates(&self, route_key: RouteKey) -> Vec<ProxyRef> {
        self.region(route_key).map(|r| r.candidates()).unwrap_or_default()
    }

    /// Route keys with at least one registered proxy, ascending.
    pub fn route_keys(&self) -> Vec<RouteKey> {
        let mut keys: Vec<_> = self.regions.iter().map(|r| *r.key()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn contains(&self, address: &str) -> bool {
        self.proxies.contains_key(address)
    }

    pub fn get(&self, address: &str) -> Option<ProxyRef> {
        self.proxies.get(address).map(|p| Arc::clone(p.value()))
    }

    pub fn list_proxies(&self) -> Vec<ProxyRef> {
        self.proxies.iter().map(|p| Arc::clone(p.value())).collect()
    }

    /// Number of registered logic modules.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn bound_proxy(&self, address: &str, connection_id: ConnectionId) -> Option<ProxyRef> {
        self.get(address).filter(|p| p.connection_id() == connection_id)
    }

    fn bound_to(&self, address: &str, connection_id: ConnectionId) -> bool {
        self.bound_proxy(address, connection_id).is_some()
    }

    fn remove_locked(&self, address: &str) -> Option<ProxyRef> {
        let (_, proxy) = self.proxies.remove(address)?;
        for key in proxy.route_keys() {
            if let Some(region) = self.region(*key) {
                region.set.remove(address);
            }
            self.refresh(*key);
        }
        Some(proxy)
    }

    /// Rebuild one region's snapshot; drop the region once it is empty.
    fn refresh(&self, route_key: RouteKey) {
        let Some(region) = self.region(route_key) else {
            return;
        };
        if region.is_empty() {
            self.regions.remove(&route_key);
        }
        // Readers still holding the region see the rebuilt snapshot.
        region.rebuild(&self.factory);
    }
}

impl std::fmt::Debug for RegionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionTable")
            .field("regions", &self.regions.len())
            .field("proxies", &self.proxies.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::proxy::BrokerClientProxy;
    use crate::load_balancer::selector::SelectorStrategy;
    use crate::net::memory::MemoryConnection;
    use crate::protocol::{ModuleInfo, ModuleKind};

    fn table() -> RegionTable {
        RegionTable::new(SelectorStrategy::Random.into_factory())
    }

    fn logic(address: &str, keys: &[RouteKey]) -> ProxyRef {
        let info = ModuleInfo {
            id: format!("logic-{address}"),
            address: address.to_string(),
            kind: ModuleKind::Logic,
            route_keys: keys.to_vec(),
        };
        Arc::new(BrokerClientProxy::new(info, MemoryConnection::new(address)))
    }

    const KEY: RouteKey = RouteKey::merge(1, 5);

    #[test]
    fn lookup_without_registration_is_no_region() {
        assert_eq!(table().lookup(KEY).unwrap_err(), RouteError::NoRegion(KEY));
    }

    #[test]
    fn register_then_remove_last_candidate() {
        let table = table();
        table.register(logic("10.0.0.1:9000", &[KEY]));
        assert_eq!(table.lookup(KEY).unwrap().address(), "10.0.0.1:9000");

        assert!(table.remove("10.0.0.1:9000").is_some());
        assert_eq!(table.lookup(KEY).unwrap_err(), RouteError::NoRegion(KEY));
        assert!(table.route_keys().is_empty());
        assert!(table.remove("10.0.0.1:9000").is_none());
    }

    #[test]
    fn re_registration_replaces_previous_proxy() {
        let table = table();
        let other = RouteKey::merge(2, 1);
        let first = logic("10.0.0.1:9000", &[KEY, other]);
        table.register(first.clone());

        let second = logic("10.0.0.1:9000", &[KEY]);
        let previous = table.register(second.clone()).unwrap();

        assert!(Arc::ptr_eq(&previous, &first));
        assert_eq!(table.len(), 1);
        assert_eq!(table.candidates(KEY).len(), 1);
        assert!(Arc::ptr_eq(&table.lookup(KEY).unwrap(), &second));
        assert_eq!(table.lookup(other).unwrap_err(), RouteError::NoRegion(other));
    }

    #[test]
    fn disconnected_proxy_is_filtered_but_known() {
        let table = table();
        let proxy = logic("10.0.0.1:9000", &[KEY]);
        let connection_id = proxy.connection_id();
        table.register(proxy);

        assert!(table.mark_disconnected("10.0.0.1:9000", connection_id));
        assert!(!table.mark_disconnected("10.0.0.1:9000", connection_id));
        assert_eq!(table.lookup(KEY).unwrap_err(), RouteError::NoCandidate(KEY));
        assert!(table.contains("10.0.0.1:9000"));
    }

    #[test]
    fn stale_connection_cannot_remove_fresh_registration() {
        let table = table();
        let stale = logic("10.0.0.1:9000", &[KEY]);
        let stale_id = stale.connection_id();
        table.register(stale);
        table.register(logic("10.0.0.1:9000", &[KEY]));

        assert!(table.remove_connection("10.0.0.1:9000", stale_id).is_none());
        assert!(table.lookup(KEY).is_ok());
    }

    #[test]
    fn held_region_observes_removal() {
        let table = table();
        table.register(logic("10.0.0.1:9000", &[KEY]));
        let region = table.region(KEY).unwrap();

        table.remove("10.0.0.1:9000");
        assert_eq!(region.next().unwrap_err(), SelectorError::Empty);
    }
}
