//! Request and response envelopes.

use serde::{Deserialize, Serialize};

use crate::protocol::cmd::RouteKey;

/// Closed set of response statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Request forwarded or answered by a logic instance.
    Ok,
    /// No region or no active candidate for the route key.
    RouteNotFound,
    /// The receiving instance had no dispatch context able to handle the request.
    DispatchFailed,
}

impl StatusCode {
    /// Numeric code as seen by external clients.
    pub const fn code(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::RouteNotFound => -1007,
            StatusCode::DispatchFailed => -1000,
        }
    }

    /// Human readable message attached to error responses.
    pub const fn message(self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::RouteNotFound => "route not found",
            StatusCode::DispatchFailed => "dispatch failed",
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}

/// Routing header carried by every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadMetadata {
    /// Merged module/command key used for routing.
    pub cmd_merge: RouteKey,
    /// Correlation id chosen by the originator.
    pub msg_id: u32,
    /// Registered address of the external module the request came from.
    /// Stamped by the gateway; responses travel back to it.
    #[serde(default)]
    pub source_address: Option<String>,
}

impl HeadMetadata {
    pub fn new(cmd_merge: RouteKey, msg_id: u32) -> Self {
        Self {
            cmd_merge,
            msg_id,
            source_address: None,
        }
    }
}

/// Inbound request envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub head: HeadMetadata,
    /// Opaque payload.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Only changed on the not-found path.
    #[serde(default = "default_status")]
    pub status: StatusCode,
    #[serde(default)]
    pub validator_msg: Option<String>,
}

fn default_status() -> StatusCode {
    StatusCode::Ok
}

impl RequestMessage {
    pub fn new(head: HeadMetadata, data: Vec<u8>) -> Self {
        Self {
            head,
            data,
            status: StatusCode::Ok,
            validator_msg: None,
        }
    }

    pub fn route_key(&self) -> RouteKey {
        self.head.cmd_merge
    }

    /// Build an empty `Ok` response correlated with this request.
    pub fn create_response(&self) -> ResponseMessage {
        ResponseMessage {
            head: self.head.clone(),
            status: StatusCode::Ok,
            validator_msg: None,
            data: Vec::new(),
        }
    }

    /// Mark this request as failed and build the matching error response.
    pub fn fail_with(&mut self, status: StatusCode) -> ResponseMessage {
        self.status = status;
        self.validator_msg = Some(status.message().to_string());
        ResponseMessage::error(self.head.clone(), status)
    }
}

/// Outbound response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub head: HeadMetadata,
    pub status: StatusCode,
    #[serde(default)]
    pub validator_msg: Option<String>,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl ResponseMessage {
    /// Error response with the status message and no payload.
    pub fn error(head: HeadMetadata, status: StatusCode) -> Self {
        Self {
            head,
            status,
            validator_msg: Some(status.message().to_string()),
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}
