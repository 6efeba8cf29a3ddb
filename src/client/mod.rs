//! Module side of the gateway protocol.
//!
//! A logic or external module keeps one [`BrokerClientItem`] per gateway it
//! is registered with. [`BrokerClientManager`] picks among the ACTIVE ones
//! and serves requests the gateway forwards through a [`Dispatch`] context.

pub mod dispatch;
pub mod item;
pub mod manager;

pub use dispatch::{Dispatch, NoDispatch};
pub use item::{BrokerClientItem, ItemRef};
pub use manager::{BrokerClientManager, BrokerClientManagerBuilder, ClientError};
