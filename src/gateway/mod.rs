//! Gateway subsystem.
//!
//! # Data Flow
//! ```text
//! Module connection (tcp)
//!     → processor.rs
//!         ModuleRegister → BalancedManager (logic regions / external pool) → ack
//!         Request        → router.rs → RegionTable lookup → forward one-way
//!                                    ↘ ROUTE_NOT_FOUND back to the origin
//!         Response       → external module that sent the request
//!     Exception → mark DISCONNECT, Close → remove
//! ```
//!
//! server.rs owns the accept loop and the shutdown drain.

pub mod processor;
pub mod router;
pub mod server;

pub use processor::GatewayProcessor;
pub use router::{RequestRouter, RouteOutcome};
pub use server::{BrokerServer, BrokerServerBuilder};
