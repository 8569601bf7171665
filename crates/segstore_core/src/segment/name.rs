//! Segment name validation.

use crate::error::ArgumentError;

/// Characters reserved for engine-internal names.
pub const RESERVED_CHARS: [char; 2] = ['#', '$'];

/// Checks a client-supplied segment name.
///
/// # Errors
///
/// Returns [`ArgumentError::InvalidSegmentName`] if the name is empty,
/// longer than `max_len` bytes, or contains a control or reserved character.
pub fn validate_segment_name(name: &str, max_len: usize) -> Result<(), ArgumentError> {
    let invalid = |reason| {
        Err(ArgumentError::InvalidSegmentName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.len() > max_len {
        return invalid("name is too long");
    }
    if name.chars().any(char::is_control) {
        return invalid("name contains a control character");
    }
    if name.contains(RESERVED_CHARS) {
        return invalid("name contains a reserved character");
    }
    Ok(())
}
