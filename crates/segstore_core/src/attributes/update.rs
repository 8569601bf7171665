//! Attribute update requests and their evaluation.

use super::id::{AttributeId, NULL_ATTRIBUTE_VALUE};
use serde::{Deserialize, Serialize};

/// How an [`AttributeUpdate`] combines with the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeUpdateType {
    /// Unconditionally sets the value.
    Replace,
    /// Sets the value only if it is greater than the current one. An absent
    /// value compares as negative infinity.
    ReplaceIfGreater,
    /// Sets the value only if the current one equals the expected value.
    /// An absent value compares as [`NULL_ATTRIBUTE_VALUE`].
    ReplaceIfEquals(i64),
    /// Adds the value to the current one, treating absent as zero.
    Accumulate,
    /// Sets the value only if the attribute is currently absent.
    SetOnce,
}

impl AttributeUpdateType {
    /// Returns true if evaluating this update depends on the current value.
    #[must_use]
    pub const fn needs_current_value(self) -> bool {
        !matches!(self, Self::Replace)
    }

    /// Short name used in logs and CLI output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::ReplaceIfGreater => "replace_if_greater",
            Self::ReplaceIfEquals(_) => "replace_if_equals",
            Self::Accumulate => "accumulate",
            Self::SetOnce => "set_once",
        }
    }
}

/// A single requested change to an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    /// Target attribute.
    pub attribute_id: AttributeId,
    /// Combination rule.
    pub update_type: AttributeUpdateType,
    /// Operand.
    pub value: i64,
}

impl AttributeUpdate {
    /// Creates an update.
    #[must_use]
    pub const fn new(attribute_id: AttributeId, update_type: AttributeUpdateType, value: i64) -> Self {
        Self {
            attribute_id,
            update_type,
            value,
        }
    }

    /// Shorthand for a [`AttributeUpdateType::Replace`] update.
    #[must_use]
    pub const fn replace(attribute_id: AttributeId, value: i64) -> Self {
        Self::new(attribute_id, AttributeUpdateType::Replace, value)
    }

    /// Shorthand for a [`AttributeUpdateType::Accumulate`] update.
    #[must_use]
    pub const fn accumulate(attribute_id: AttributeId, delta: i64) -> Self {
        Self::new(attribute_id, AttributeUpdateType::Accumulate, delta)
    }

    /// Shorthand for a [`AttributeUpdateType::ReplaceIfEquals`] update.
    #[must_use]
    pub const fn replace_if_equals(attribute_id: AttributeId, value: i64, expected: i64) -> Self {
        Self::new(
            attribute_id,
            AttributeUpdateType::ReplaceIfEquals(expected),
            value,
        )
    }

    /// Evaluates the update against `current`, which is
    /// [`NULL_ATTRIBUTE_VALUE`] when the attribute is absent.
    ///
    /// Returns the resulting value or the reason the condition failed.
    pub fn evaluate(&self, current: i64) -> Result<i64, String> {
        match self.update_type {
            AttributeUpdateType::Replace => Ok(self.value),
            AttributeUpdateType::ReplaceIfGreater => {
                if current == NULL_ATTRIBUTE_VALUE || self.value > current {
                    Ok(self.value)
                } else {
                    Err(format!(
                        "value {} is not greater than current value {current}",
                        self.value
                    ))
                }
            }
            AttributeUpdateType::ReplaceIfEquals(expected) => {
                if current == expected {
                    Ok(self.value)
                } else {
                    Err(format!(
                        "expected {}, found {}",
                        display_value(expected),
                        display_value(current)
                    ))
                }
            }
            AttributeUpdateType::Accumulate => {
                let base = if current == NULL_ATTRIBUTE_VALUE { 0 } else { current };
                match base.checked_add(self.value) {
                    Some(sum) if sum != NULL_ATTRIBUTE_VALUE => Ok(sum),
                    _ => Err(format!("accumulating {} onto {base} overflows", self.value)),
                }
            }
            AttributeUpdateType::SetOnce => {
                if current == NULL_ATTRIBUTE_VALUE {
                    Ok(self.value)
                } else {
                    Err(format!("already set to {current}"))
                }
            }
        }
    }
}

fn display_value(value: i64) -> String {
    if value == NULL_ATTRIBUTE_VALUE {
        "null".to_string()
    } else {
        value.to_string()
    }
}
