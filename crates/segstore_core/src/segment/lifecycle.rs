//! Segment lifecycle states.
//!
//! ```text
//! Creating -> Active -> Sealed -> Merging -> Merged
//!               |         |
//!               +---------+-----> Deleted
//! ```
//!
//! Merged and Deleted are terminal. A merged segment keeps its name until it
//! is deleted, so the name cannot be reused while the tombstone exists.

use crate::error::{SegmentError, SegmentResult};
use std::fmt;

/// Lifecycle state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentState {
    /// Registered but not yet committed.
    Creating,
    /// Accepting appends.
    Active,
    /// Length is final.
    Sealed,
    /// Being merged into another segment.
    Merging,
    /// Contents now belong to another segment.
    Merged,
    /// Removed.
    Deleted,
}

impl SegmentState {
    /// Checks that the segment can be read or inspected.
    ///
    /// # Errors
    ///
    /// `SegmentNotFound` for creating and deleted segments, `SegmentMerged`
    /// for merging and merged ones.
    pub fn require_readable(self, name: &str) -> SegmentResult<()> {
        match self {
            Self::Active | Self::Sealed => Ok(()),
            Self::Merging | Self::Merged => Err(SegmentError::merged(name)),
            Self::Creating | Self::Deleted => Err(SegmentError::not_found(name)),
        }
    }

    /// Checks that the segment accepts appends and attribute updates.
    ///
    /// # Errors
    ///
    /// As [`Self::require_readable`], plus `SegmentSealed` for sealed
    /// segments.
    pub fn require_writable(self, name: &str) -> SegmentResult<()> {
        self.require_readable(name)?;
        if self == Self::Sealed {
            return Err(SegmentError::sealed(name));
        }
        Ok(())
    }

    /// Returns true if the state accepts a transition to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Creating, Self::Active)
                | (Self::Active, Self::Sealed)
                | (Self::Sealed, Self::Merging)
                | (Self::Merging, Self::Merged)
                | (Self::Active | Self::Sealed | Self::Merged, Self::Deleted)
        )
    }

    /// Returns true for states no operation other than delete can leave.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Deleted)
    }

    /// Returns true once the length can no longer grow.
    #[must_use]
    pub const fn is_sealed(self) -> bool {
        matches!(self, Self::Sealed | Self::Merging | Self::Merged)
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Sealed => "sealed",
            Self::Merging => "merging",
            Self::Merged => "merged",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        use SegmentState::*;
        assert!(Creating.can_transition_to(Active));
        assert!(Active.can_transition_to(Sealed));
        assert!(Sealed.can_transition_to(Merging));
        assert!(Merging.can_transition_to(Merged));
        assert!(Active.can_transition_to(Deleted));
        assert!(Merged.can_transition_to(Deleted));
        assert!(!Active.can_transition_to(Merging));
        assert!(!Sealed.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Deleted));
    }

    #[test]
    fn access_checks() {
        assert!(SegmentState::Sealed.require_readable("s").is_ok());
        assert!(matches!(
            SegmentState::Sealed.require_writable("s"),
            Err(SegmentError::SegmentSealed { .. })
        ));
        assert!(matches!(
            SegmentState::Merged.require_writable("s"),
            Err(SegmentError::SegmentMerged { .. })
        ));
        assert!(matches!(
            SegmentState::Deleted.require_readable("s"),
            Err(SegmentError::SegmentNotFound { .. })
        ));
    }
}
