//! Consensus boundary
//!
//! Drives raft-rs and hands committed entries to a [`StateMachine`].

use crate::engine::{ApplyResult, SnapshotError};

pub mod node;
pub mod proposal;
pub mod router;
pub mod storage;

/// Deterministic state machine fed by the committed log.
pub trait StateMachine {
    /// Applies the entry committed at `index`. A rejection is a normal
    /// outcome and still consumes the log slot.
    fn apply(&mut self, index: u64, data: &[u8]) -> ApplyResult;

    fn snapshot(&self) -> Result<Vec<u8>, SnapshotError>;

    /// Replaces the whole state with `data`, taken at `last_index`.
    fn on_snapshot(
        &mut self,
        last_index: u64,
        last_term: u64,
        data: &[u8],
    ) -> Result<(), SnapshotError>;
}
