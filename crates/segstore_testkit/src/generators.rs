//! Property-based test generators using proptest.
//!
//! Provides strategies for generating segment names, payloads, attribute
//! updates and operation sequences, plus a reference model to check a
//! store against.

use proptest::prelude::*;
use segstore_core::{AttributeId, AttributeUpdate, AttributeUpdateType, NULL_ATTRIBUTE_VALUE};
use std::collections::HashMap;

/// Strategy for generating valid segment names.
pub fn segment_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}(/[a-z0-9_]{1,15}){0,2}").expect("Invalid regex")
}

/// Strategy for generating extended attribute ids from a small pool, so
/// sequences revisit the same attributes.
pub fn attribute_id_strategy() -> impl Strategy<Value = AttributeId> {
    (0u64..8).prop_map(|n| AttributeId::from_parts(0x5151, n))
}

/// Strategy for generating append payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for generating update types.
pub fn update_type_strategy() -> impl Strategy<Value = AttributeUpdateType> {
    prop_oneof![
        Just(AttributeUpdateType::Replace),
        Just(AttributeUpdateType::ReplaceIfGreater),
        (-4i64..4).prop_map(AttributeUpdateType::ReplaceIfEquals),
        Just(AttributeUpdateType::Accumulate),
        Just(AttributeUpdateType::SetOnce),
    ]
}

/// Strategy for generating a single attribute update.
pub fn attribute_update_strategy() -> impl Strategy<Value = AttributeUpdate> {
    (attribute_id_strategy(), update_type_strategy(), -4i64..4)
        .prop_map(|(id, kind, value)| AttributeUpdate::new(id, kind, value))
}

/// Strategy for generating an update batch without duplicate ids.
pub fn attribute_batch_strategy() -> impl Strategy<Value = Vec<AttributeUpdate>> {
    prop::collection::vec(attribute_update_strategy(), 0..4).prop_map(|mut batch| {
        let mut seen = std::collections::HashSet::new();
        batch.retain(|u| seen.insert(u.attribute_id));
        batch
    })
}

/// An operation against a single segment.
#[derive(Debug, Clone)]
pub enum SegmentOperation {
    /// Unconditional append.
    Append {
        /// Payload.
        data: Vec<u8>,
        /// Attribute updates.
        updates: Vec<AttributeUpdate>,
    },
    /// Conditional append at `length + skew`, clamped at zero.
    AppendAt {
        /// Offset relative to the current length.
        skew: i64,
        /// Payload.
        data: Vec<u8>,
    },
    /// Attribute batch.
    Update {
        /// Attribute updates.
        updates: Vec<AttributeUpdate>,
    },
    /// Truncate at `length * percent / 100`.
    Truncate {
        /// Position as a percentage of the length.
        percent: u8,
    },
    /// Seal.
    Seal,
}

/// Strategy for generating segment operations.
pub fn segment_operation_strategy() -> impl Strategy<Value = SegmentOperation> {
    prop_oneof![
        4 => (payload_strategy(), attribute_batch_strategy())
            .prop_map(|(data, updates)| SegmentOperation::Append { data, updates }),
        2 => (-2i64..=2, payload_strategy()).prop_map(|(skew, data)| SegmentOperation::AppendAt { skew, data }),
        3 => attribute_batch_strategy().prop_map(|updates| SegmentOperation::Update { updates }),
        1 => (0u8..=100).prop_map(|percent| SegmentOperation::Truncate { percent }),
        1 => Just(SegmentOperation::Seal),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<SegmentOperation>> {
    prop::collection::vec(segment_operation_strategy(), min_ops..max_ops)
}

/// Outcome class the model predicts for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOutcome {
    /// The operation succeeds.
    Ok,
    /// The segment is sealed.
    Sealed,
    /// A conditional offset or truncation offset does not match.
    BadOffset,
    /// An attribute condition does not hold.
    AttributeFailed,
}

/// Reference model of a single segment.
#[derive(Debug, Clone, Default)]
pub struct SegmentModel {
    /// Bytes appended so far.
    pub data: Vec<u8>,
    /// Truncation offset.
    pub truncation_offset: u64,
    /// Whether the segment is sealed.
    pub sealed: bool,
    /// Extended attribute values.
    pub attributes: HashMap<AttributeId, i64>,
}

impl SegmentModel {
    /// Current length.
    pub fn length(&self) -> u64 {
        self.data.len() as u64
    }

    /// Current value of `id`.
    pub fn attribute(&self, id: AttributeId) -> i64 {
        self.attributes.get(&id).copied().unwrap_or(NULL_ATTRIBUTE_VALUE)
    }

    fn apply_updates(&mut self, updates: &[AttributeUpdate]) -> Result<(), ModelOutcome> {
        let mut resolved = Vec::with_capacity(updates.len());
        for update in updates {
            let value = update
                .evaluate(self.attribute(update.attribute_id))
                .map_err(|_| ModelOutcome::AttributeFailed)?;
            resolved.push((update.attribute_id, value));
        }
        for (id, value) in resolved {
            self.attributes.insert(id, value);
        }
        Ok(())
    }

    /// Conditional offset `AppendAt` resolves to for the current length.
    pub fn resolve_offset(&self, skew: i64) -> u64 {
        self.length().saturating_add_signed(skew)
    }

    /// Truncation offset `Truncate` resolves to for the current length.
    pub fn resolve_truncation(&self, percent: u8) -> u64 {
        self.length() * u64::from(percent) / 100
    }

    /// Applies `op` and returns the expected outcome.
    pub fn apply(&mut self, op: &SegmentOperation) -> ModelOutcome {
        let result = match op {
            SegmentOperation::Append { data, updates } => self.append(None, data, updates),
            SegmentOperation::AppendAt { skew, data } => self.append(Some(self.resolve_offset(*skew)), data, &[]),
            SegmentOperation::Update { updates } => {
                if self.sealed {
                    Err(ModelOutcome::Sealed)
                } else {
                    self.apply_updates(updates)
                }
            }
            SegmentOperation::Truncate { percent } => {
                let offset = self.resolve_truncation(*percent);
                if offset < self.truncation_offset {
                    Err(ModelOutcome::BadOffset)
                } else {
                    self.truncation_offset = offset;
                    Ok(())
                }
            }
            SegmentOperation::Seal => {
                self.sealed = true;
                Ok(())
            }
        };
        result.err().unwrap_or(ModelOutcome::Ok)
    }

    fn append(&mut self, offset: Option<u64>, data: &[u8], updates: &[AttributeUpdate]) -> Result<(), ModelOutcome> {
        if self.sealed {
            return Err(ModelOutcome::Sealed);
        }
        if offset.is_some_and(|o| o != self.length()) {
            return Err(ModelOutcome::BadOffset);
        }
        self.apply_updates(updates)?;
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
