//! Errors reported by the checked pool operations.

use thiserror::Error;

/// Failure of a checked slot-pool operation.
///
/// The unchecked fast paths treat the same conditions as precondition
/// violations instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("slot index {index} out of range for pool of {capacity}")]
    SlotOutOfRange { index: usize, capacity: usize },

    #[error("slot {index} is already occupied")]
    SlotOccupied { index: usize },

    #[error("pool capacity {capacity} overflows the slot layout")]
    CapacityOverflow { capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = PoolError::SlotOutOfRange {
            index: 5,
            capacity: 5,
        };
        assert_eq!(err.to_string(), "slot index 5 out of range for pool of 5");
        assert_eq!(
            PoolError::SlotOccupied { index: 1 }.to_string(),
            "slot 1 is already occupied"
        );
    }
}
