//! State machine implementation for the inventory service
//!
//! This module implements the Raft state machine interface for the
//! inventory store.

use std::sync::Arc;

use crate::engine::{ApplyError, ApplyResult, Command, InventorySnapshot, SnapshotError, Store};
use crate::metrics;
use crate::raft::StateMachine;

/// State machine that wraps the inventory store
///
/// The store is shared: the consensus node applies into it while the
/// request layer reads from it.
#[derive(Debug, Default, Clone)]
pub struct StateInventory {
    store: Arc<Store>,
    applied_index: u64,
}

impl StateInventory {
    pub fn new() -> StateInventory {
        StateInventory::default()
    }

    pub fn with_store(store: Arc<Store>) -> StateInventory {
        StateInventory {
            store,
            applied_index: 0,
        }
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    /// Index of the last log entry or snapshot applied
    pub fn applied_index(&self) -> u64 {
        self.applied_index
    }
}

impl StateMachine for StateInventory {
    fn apply(&mut self, index: u64, data: &[u8]) -> ApplyResult {
        self.applied_index = index;
        let cmd = match Command::decode(data) {
            Ok(cmd) => cmd,
            Err(e) => {
                let err = ApplyError::from(e);
                log::warn!("entry {} rejected: {}", index, err);
                metrics::record_apply(None, &Err(err.clone()));
                return Err(err);
            }
        };

        let result = self.store.apply(&cmd);
        if let Err(e) = &result {
            log::warn!(
                "entry {} rejected: {} {} {}",
                index,
                cmd.op.as_str(),
                cmd.kind.as_str(),
                e
            );
        }
        metrics::record_apply(Some((cmd.kind, cmd.op)), &result);
        result
    }

    fn snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        self.store.snapshot().to_bytes()
    }

    /// Empty data is the bootstrap snapshot and restores the empty inventory.
    fn on_snapshot(&mut self, last_index: u64, last_term: u64, data: &[u8]) -> Result<(), SnapshotError> {
        let snapshot = if data.is_empty() {
            InventorySnapshot::default()
        } else {
            InventorySnapshot::from_bytes(data)?
        };
        self.store.restore(snapshot);
        self.applied_index = last_index;
        log::info!(
            "restored inventory from snapshot at index {} term {}",
            last_index,
            last_term
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::{Filament, FilamentType, Printer};
    use crate::engine::{Applied, EntityKind, ErrorKind};

    #[test]
    fn test_apply_decodes_entry() {
        let mut sm = StateInventory::new();
        let data = Command::create_printer(&Printer::new("p1", "Prusa", "MK4"))
            .unwrap()
            .encode()
            .unwrap();

        let applied = sm.apply(3, &data).unwrap();
        assert!(matches!(applied, Applied::Printer(_)));
        assert_eq!(sm.applied_index(), 3);
        assert!(sm.store().printer("p1").is_some());
    }

    #[test]
    fn test_malformed_entry_is_reported() {
        let mut sm = StateInventory::new();
        let err = sm.apply(4, b"not a command").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(sm.applied_index(), 4);
    }

    #[test]
    fn test_snapshot_transfers_state() {
        let mut leader = StateInventory::new();
        let data = Command::create_filament(&Filament::new("f1", FilamentType::ABS, "White", 750, 700))
            .unwrap()
            .encode()
            .unwrap();
        leader.apply(2, &data).unwrap();
        let snapshot = leader.snapshot().unwrap();

        let mut follower = StateInventory::new();
        let stale = Command::create_printer(&Printer::new("p0", "Anycubic", "Kobra"))
            .unwrap()
            .encode()
            .unwrap();
        follower.apply(1, &stale).unwrap();
        follower.on_snapshot(2, 1, &snapshot).unwrap();

        assert_eq!(follower.applied_index(), 2);
        assert_eq!(follower.store().filament("f1").unwrap().remaining_weight_grams, 700);
        assert!(follower.store().printer("p0").is_none());
    }

    #[test]
    fn test_empty_snapshot_clears_inventory() {
        let mut sm = StateInventory::new();
        let data = Command::create_printer(&Printer::new("p1", "Bambu", "X1"))
            .unwrap()
            .encode()
            .unwrap();
        sm.apply(2, &data).unwrap();
        sm.on_snapshot(1, 1, &[]).unwrap();
        assert!(sm.store().view(|inventory| inventory.is_empty()));

        let delete = Command::delete(EntityKind::Printer, "p1").unwrap().encode().unwrap();
        assert_eq!(sm.apply(2, &delete).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_corrupt_snapshot_keeps_state() {
        let mut sm = StateInventory::new();
        let data = Command::create_printer(&Printer::new("p1", "Bambu", "X1"))
            .unwrap()
            .encode()
            .unwrap();
        sm.apply(2, &data).unwrap();
        assert!(sm.on_snapshot(5, 2, &[9, 9, 9]).is_err());
        assert_eq!(sm.applied_index(), 2);
        assert!(sm.store().printer("p1").is_some());
    }
}
