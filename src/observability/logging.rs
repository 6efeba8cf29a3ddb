//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Honour `RUST_LOG` first, then the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

const LIBRARY_TARGET: &str = "broker_gateway";

/// Install the global subscriber.
///
/// Without `RUST_LOG`, the library and `binary_target` (pass `module_path!()`
/// from the binary's `main`) log at the configured level.
/// Returns `false` if a subscriber was already installed.
pub fn init(config: &ObservabilityConfig, binary_target: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level, binary_target)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

fn default_directive(level: &str, binary_target: &str) -> String {
    if binary_target == LIBRARY_TARGET {
        format!("{LIBRARY_TARGET}={level}")
    } else {
        format!("{LIBRARY_TARGET}={level},{binary_target}={level}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_target_shares_the_configured_level() {
        assert_eq!(
            default_directive("debug", "broker_module"),
            "broker_gateway=debug,broker_module=debug"
        );
        assert_eq!(default_directive("info", "broker_gateway"), "broker_gateway=info");
        assert!(EnvFilter::try_new(default_directive("warn", "broker_module")).is_ok());
    }
}
