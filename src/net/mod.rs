//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection (gateway side)
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (connection id, drain tracking)
//!     → tcp.rs (reader/writer tasks, packet correlation)
//!     → FrameHandler (gateway processor)
//!
//! Outgoing TCP connection (module side)
//!     → tcp.rs TcpConnector (connect timeout)
//!     → FrameHandler (connection item)
//!
//! Wire: codec.rs (u32 length prefix + JSON packet)
//! ```
//!
//! # Design Decisions
//! - The rest of the crate only sees the traits in transport.rs
//! - memory.rs provides a socket-free transport for tests (`test-util` feature)
//! - One-way sends never block: they enqueue onto the writer task
//! - Each connection tracked for graceful shutdown

pub mod codec;
pub mod connection;
pub mod listener;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod tcp;
pub mod transport;

pub use connection::{AtomicStatus, ConnectionId, ConnectionStatus, ConnectionTracker};
pub use listener::{Accepted, Listener, ListenerError};
pub use tcp::{TcpConnection, TcpConnector};
pub use transport::{Connection, ConnectionEvent, ConnectionRef, Connector, FrameHandler, TransportError};
