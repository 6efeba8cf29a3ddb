//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, value ranges and module self-description
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::protocol::ModuleKind;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Minimum packet size limit; registration frames must always fit.
const MIN_FRAME_BYTES: usize = 1024;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a valid socket address")]
    InvalidSocketAddress { field: &'static str, value: String },

    #[error("{field}: '{value}' is not a host:port address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("transport.max_frame_bytes must be at least 1024")]
    FrameLimitTooSmall,

    #[error("client.gateway_addresses lists '{0}' more than once")]
    DuplicateGateway(String),

    #[error("client.routes must not be empty for a logic module")]
    NoRoutes,

    #[error("observability.log_level '{0}' is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),
}

/// Check a `host:port` identity string.
pub fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0),
        None => false,
    }
}

/// Validate the whole configuration, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidSocketAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero {
            field: "listener.max_connections",
        });
    }

    if config.transport.connect_timeout_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "transport.connect_timeout_ms",
        });
    }
    if config.transport.request_timeout_ms == 0 {
        errors.push(ValidationError::Zero {
            field: "transport.request_timeout_ms",
        });
    }
    if config.transport.max_frame_bytes < MIN_FRAME_BYTES {
        errors.push(ValidationError::FrameLimitTooSmall);
    }

    let mut seen = HashSet::new();
    for address in &config.client.gateway_addresses {
        if !is_host_port(address) {
            errors.push(ValidationError::InvalidAddress {
                field: "client.gateway_addresses",
                value: address.clone(),
            });
        } else if !seen.insert(address.as_str()) {
            errors.push(ValidationError::DuplicateGateway(address.clone()));
        }
    }
    if !is_host_port(&config.client.advertised_address) {
        errors.push(ValidationError::InvalidAddress {
            field: "client.advertised_address",
            value: config.client.advertised_address.clone(),
        });
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(config.observability.log_level.clone()));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidSocketAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Extra checks for a process that runs as a module rather than a gateway.
pub fn validate_client(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if config.client.kind == ModuleKind::Logic && config.client.routes.is_empty() {
        errors.push(ValidationError::NoRoutes);
    }
    if config.client.gateway_addresses.is_empty() {
        errors.push(ValidationError::Zero {
            field: "client.gateway_addresses",
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
