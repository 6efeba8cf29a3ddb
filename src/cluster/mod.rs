//! Cluster membership reactions.
//!
//! Discovery lives elsewhere; this module only consumes joined/left events
//! and applies them to the managers that care.
//!
//! # Data Flow
//! ```text
//! membership source → mpsc channel → run_membership
//!     → BrokerClientManager (module side: connect / forget a gateway)
//!     → PoolMembership      (gateway side: forget a logic or external module)
//! ```

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{broadcast, mpsc};

use crate::client::BrokerClientManager;
use crate::load_balancer::BalancedManager;
use crate::protocol::ModuleKind;

/// A cluster member appeared or went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(String),
    Left(String),
}

impl MembershipEvent {
    pub fn address(&self) -> &str {
        match self {
            MembershipEvent::Joined(address) | MembershipEvent::Left(address) => address,
        }
    }
}

/// Reacts to membership events.
pub trait MembershipListener: Send + Sync {
    fn address_joined<'a>(&'a self, address: &'a str) -> BoxFuture<'a, ()>;

    fn address_left<'a>(&'a self, address: &'a str) -> BoxFuture<'a, ()>;
}

impl MembershipListener for BrokerClientManager {
    fn address_joined<'a>(&'a self, address: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.get(address).is_some_and(|item| item.is_active()) {
                return;
            }
            // A DISCONNECT item is replaced; on failure a later join retries.
            if let Err(e) = self.register(address).await {
                tracing::warn!(gateway = %address, error = %e, "Could not register with joined gateway");
            }
        })
    }

    fn address_left<'a>(&'a self, address: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.remove(address);
        })
    }
}

/// Applies membership events to one pool of a [`BalancedManager`].
#[derive(Debug, Clone)]
pub struct PoolMembership {
    balanced: Arc<BalancedManager>,
    kind: ModuleKind,
}

impl PoolMembership {
    pub fn new(balanced: Arc<BalancedManager>, kind: ModuleKind) -> Self {
        Self { balanced, kind }
    }
}

impl MembershipListener for PoolMembership {
    fn address_joined<'a>(&'a self, address: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            // Modules dial the gateway; the proxy appears when it registers.
            tracing::debug!(kind = %self.kind, address, "Module joined, awaiting registration");
        })
    }

    fn address_left<'a>(&'a self, address: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Some(proxy) = self.balanced.remove(self.kind, address) {
                proxy.connection().close();
            }
        })
    }
}

/// Feed `events` to `listener` until the channel closes or `shutdown` fires.
///
/// Events are applied one at a time, in arrival order.
pub async fn run_membership(
    listener: Arc<dyn MembershipListener>,
    mut events: mpsc::UnboundedReceiver<MembershipEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::debug!("Membership source closed");
                    break;
                };
                match &event {
                    MembershipEvent::Joined(address) => listener.address_joined(address).await,
                    MembershipEvent::Left(address) => listener.address_left(address).await,
                }
            }
            _ = shutdown.recv() => {
                tracing::debug!("Membership loop received shutdown signal, exiting");
                break;
            }
        }
    }
}
