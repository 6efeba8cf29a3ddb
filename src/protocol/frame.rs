//! Wire frames exchanged between gateway and modules.

use serde::{Deserialize, Serialize};

use crate::protocol::cmd::RouteKey;
use crate::protocol::message::{RequestMessage, ResponseMessage};

/// Which pool a connecting module belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    /// Backend instance serving a set of route keys.
    Logic,
    /// Client-facing front-end instance.
    External,
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleKind::Logic => f.write_str("logic"),
            ModuleKind::External => f.write_str("external"),
        }
    }
}

/// Self-description a module sends when it connects to a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Module instance id.
    pub id: String,
    /// Advertised `host:port` identity of the module.
    pub address: String,
    pub kind: ModuleKind,
    /// Route keys served (ignored for external modules).
    #[serde(default)]
    pub route_keys: Vec<RouteKey>,
}

/// Application frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Frame {
    Request(RequestMessage),
    Response(ResponseMessage),
    ModuleRegister(ModuleInfo),
    ModuleRegisterAck { broker_id: String },
}

impl Frame {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Request(_) => "request",
            Frame::Response(_) => "response",
            Frame::ModuleRegister(_) => "module_register",
            Frame::ModuleRegisterAck { .. } => "module_register_ack",
        }
    }
}

/// Transport envelope.
///
/// `invoke_id == 0` marks a one-way send. A non-zero id expects exactly one
/// packet back with `reply == true` and the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub invoke_id: u64,
    #[serde(default)]
    pub reply: bool,
    pub frame: Frame,
}

impl Packet {
    pub fn oneway(frame: Frame) -> Self {
        Self {
            invoke_id: 0,
            reply: false,
            frame,
        }
    }

    pub fn invoke(invoke_id: u64, frame: Frame) -> Self {
        Self {
            invoke_id,
            reply: false,
            frame,
        }
    }

    pub fn reply(invoke_id: u64, frame: Frame) -> Self {
        Self {
            invoke_id,
            reply: true,
            frame,
        }
    }

    /// Invoke id if the sender waits for a reply.
    pub fn expects_reply(&self) -> Option<u64> {
        (!self.reply && self.invoke_id != 0).then_some(self.invoke_id)
    }
}
