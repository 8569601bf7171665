//! Attribute identifiers and values.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Sentinel value meaning "no value".
///
/// Setting an attribute to this value removes it.
pub const NULL_ATTRIBUTE_VALUE: i64 = i64::MIN;

/// High 64 bits shared by every core attribute id.
const CORE_PREFIX: u64 = 0x8000_0000_0000_0000;

/// A 128-bit attribute identifier.
///
/// Core attributes live in segment metadata and are never evicted or
/// persisted to the attribute store. Everything else is extended: cached
/// with LRU eviction and written through to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeId(Uuid);

impl AttributeId {
    /// Number of events appended to the segment.
    pub const EVENT_COUNT: Self = Self::core(0);

    /// Segment creation time in milliseconds since the Unix epoch.
    pub const CREATION_TIME: Self = Self::core(1);

    /// Wraps a UUID.
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Builds an id from its high and low halves.
    #[must_use]
    pub const fn from_parts(high: u64, low: u64) -> Self {
        Self(Uuid::from_u128(((high as u128) << 64) | low as u128))
    }

    /// Builds a core attribute id.
    #[must_use]
    pub const fn core(low: u64) -> Self {
        Self::from_parts(CORE_PREFIX, low)
    }

    /// Generates a random extended attribute id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the wrapped UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the id as 16 big-endian bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Rebuilds an id from 16 big-endian bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns true for core attributes.
    #[must_use]
    pub const fn is_core(&self) -> bool {
        (self.0.as_u128() >> 64) as u64 == CORE_PREFIX
    }

    /// Returns true for extended attributes.
    #[must_use]
    pub const fn is_extended(&self) -> bool {
        !self.is_core()
    }
}

impl From<Uuid> for AttributeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_core() {
            write!(f, "core:{}", self.0.as_u128() as u64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}
