//! Chain ordering of operations and ledger cutoffs.

use crate::domain::Operation;
use serde::{Deserialize, Serialize};

/// Position of an event on chain.
///
/// Ordering: block -> log_index. This is the only order in which ledger
/// transitions may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub block: i64,
    pub log_index: i64,
}

impl Position {
    pub fn new(block: i64, log_index: i64) -> Self {
        Position { block, log_index }
    }
}

/// Bound applied to "latest snapshot" ledger reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// Strictly before the position.
    Before(Position),
    /// At or before the position.
    AtOrBefore(Position),
}

impl Cutoff {
    /// Everything recorded up to and including `block`.
    pub fn end_of_block(block: i64) -> Self {
        Cutoff::AtOrBefore(Position::new(block, i64::MAX))
    }

    /// No bound at all.
    pub fn latest() -> Self {
        Cutoff::AtOrBefore(Position::new(i64::MAX, i64::MAX))
    }

    pub fn position(&self) -> Position {
        match self {
            Cutoff::Before(p) | Cutoff::AtOrBefore(p) => *p,
        }
    }

    pub fn is_inclusive(&self) -> bool {
        matches!(self, Cutoff::AtOrBefore(_))
    }

    /// Whether a snapshot recorded at `position` falls inside the bound.
    pub fn admits(&self, position: Position) -> bool {
        match self {
            Cutoff::Before(p) => position < *p,
            Cutoff::AtOrBefore(p) => position <= *p,
        }
    }
}

/// Sort operations into replay order.
///
/// The sort is stable, so operations sharing a position keep their input order.
pub fn sort_operations(operations: &mut [Operation]) {
    operations.sort_by_key(|op| op.position());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Address, Topic};

    fn op(id: &str, block: i64, log_index: i64) -> Operation {
        Operation::new(
            id,
            Topic::Deposit,
            Address::new("0x00000000000000000000000000000000000000aa"),
            Position::new(block, log_index),
            1_700_000_000,
        )
    }

    #[test]
    fn test_position_orders_by_block_then_log_index() {
        assert!(Position::new(1, 50) < Position::new(2, 0));
        assert!(Position::new(2, 1) < Position::new(2, 3));
    }

    #[test]
    fn test_sort_operations() {
        let mut ops = vec![op("c", 200, 1), op("a", 100, 5), op("b", 100, 2)];
        sort_operations(&mut ops);
        let ids: Vec<&str> = ops.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_cutoff_admits() {
        let p = Position::new(100, 5);
        assert!(Cutoff::AtOrBefore(p).admits(p));
        assert!(!Cutoff::Before(p).admits(p));
        assert!(Cutoff::Before(p).admits(Position::new(100, 4)));
        assert!(Cutoff::end_of_block(100).admits(Position::new(100, 999_999)));
        assert!(!Cutoff::end_of_block(100).admits(Position::new(101, 0)));
    }
}
