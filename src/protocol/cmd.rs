//! Route key encoding.
//!
//! A route key merges a module id (high 16 bits) with a command id
//! (low 16 bits). Both halves are `u16`, so distinct pairs can never
//! collide.

use serde::{Deserialize, Serialize};

/// Number of bits reserved for the command id.
pub const COMMAND_BITS: u32 = 16;

const COMMAND_MASK: u32 = (1 << COMMAND_BITS) - 1;

/// Merged routing key (`module_id << 16 | command_id`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteKey(u32);

impl RouteKey {
    /// Merge a module id and a command id into one key.
    pub const fn merge(module_id: u16, command_id: u16) -> Self {
        Self(((module_id as u32) << COMMAND_BITS) | command_id as u32)
    }

    /// Wrap an already merged key.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn module_id(self) -> u16 {
        (self.0 >> COMMAND_BITS) as u16
    }

    pub const fn command_id(self) -> u16 {
        (self.0 & COMMAND_MASK) as u16
    }

    /// Get the raw merged value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for RouteKey {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<RouteKey> for u32 {
    fn from(key: RouteKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.module_id(), self.command_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_places_module_in_high_bits() {
        let key = RouteKey::merge(1, 5);
        assert_eq!(key.as_u32(), 0x0001_0005);
        assert_eq!(key.module_id(), 1);
        assert_eq!(key.command_id(), 5);
    }

    #[test]
    fn distinct_pairs_never_collide() {
        assert_ne!(RouteKey::merge(1, 0), RouteKey::merge(0, 1));
        assert_ne!(RouteKey::merge(u16::MAX, 0), RouteKey::merge(0, u16::MAX));
        let key = RouteKey::merge(u16::MAX, u16::MAX);
        assert_eq!(key.module_id(), u16::MAX);
        assert_eq!(key.command_id(), u16::MAX);
    }

    #[test]
    fn display_shows_both_halves() {
        assert_eq!(RouteKey::from_raw(0x0002_0003).to_string(), "2-3");
    }
}
