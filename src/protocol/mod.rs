//! Protocol subsystem.
//!
//! # Data Flow
//! ```text
//! External instance
//!     → RequestMessage { head: HeadMetadata { cmd_merge, msg_id }, data }
//!     → Packet { invoke_id, reply, frame: Frame::Request(..) }
//!     → gateway routes on head.cmd_merge (cmd.rs)
//!     → logic instance answers with Frame::Response(ResponseMessage)
//! ```
//!
//! # Design Decisions
//! - Route key bit layout is fixed, never negotiated
//! - Status codes are a closed set
//! - Payloads stay opaque bytes; the gateway never inspects them

pub mod cmd;
pub mod frame;
pub mod message;

pub use cmd::RouteKey;
pub use frame::{Frame, ModuleInfo, ModuleKind, Packet};
pub use message::{HeadMetadata, RequestMessage, ResponseMessage, StatusCode};
