//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Module registers (kind, address, route keys)
//!     → pool.rs BalancedManager picks the pool for the kind
//!         - logic: region.rs RegionTable (one Region per route key)
//!         - external: pool.rs ExternalPool (flat)
//!     → proxy.rs BrokerClientProxy created for the address
//!     → owning Region(s) rebuild their selector snapshot
//!
//! Request routed on route key
//!     → RegionTable::lookup
//!     → selector.rs ElementSelector::next over the current snapshot
//!         - random.rs (default, uniform)
//!         - round_robin.rs (rotate through candidates)
//!     → BrokerClientProxy::oneway
//! ```
//!
//! # Design Decisions
//! - Selector snapshots are immutable and replaced wholesale via ArcSwap
//! - Writers serialise mutate+rebuild; readers never take a lock on the snapshot
//! - Only ACTIVE proxies make it into a snapshot

pub mod pool;
pub mod proxy;
pub mod random;
pub mod region;
pub mod round_robin;
pub mod selector;

pub use pool::{BalancedManager, ExternalPool, ProxyRef};
pub use proxy::BrokerClientProxy;
pub use region::{Region, RegionTable, RouteError};
pub use selector::{BoxSelector, ElementSelector, SelectorError, SelectorFactory, SelectorStrategy, SharedSelectorFactory};
