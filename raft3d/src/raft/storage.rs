use raft::eraftpb::Entry;
use raft::eraftpb::HardState;
use raft::eraftpb::Snapshot;
use raft::{storage::MemStorage, GetEntriesContext, RaftState, Result, Storage, StorageError};
use raft_proto::eraftpb::ConfState;

/// Raft log storage of one node.
///
/// Entries and hard state live in a `MemStorage`. Next to it the storage
/// keeps the latest state-machine snapshot, so a follower that needs
/// compacted entries receives the real inventory rather than bare metadata.
/// The stored snapshot always covers every compacted entry.
pub struct NodeStorage {
    mem_storage: MemStorage,
    snapshot: Snapshot,
}

impl NodeStorage {
    /// A bootstrapping node starts from an empty snapshot at index 1 with
    /// itself as the only voter; other nodes wait for the leader.
    pub fn new(bootstrap: bool, id: u64) -> Result<Self> {
        let mem_storage = MemStorage::new();
        let mut snapshot = Snapshot::default();
        if bootstrap {
            snapshot.mut_metadata().index = 1;
            snapshot.mut_metadata().term = 1;
            snapshot.mut_metadata().mut_conf_state().voters = vec![id];
            mem_storage.wl().apply_snapshot(snapshot.clone())?;
        }
        Ok(NodeStorage {
            mem_storage,
            snapshot,
        })
    }

    pub fn append_entries(&mut self, entries: &[Entry]) -> Result<()> {
        self.mem_storage.wl().append(entries)
    }

    pub fn set_conf_state(&mut self, conf_state: ConfState) {
        self.mem_storage.wl().set_conf_state(conf_state)
    }

    pub fn set_hardstate(&mut self, hs: HardState) {
        self.mem_storage.wl().set_hardstate(hs);
    }

    pub fn set_commit(&mut self, commit: u64) {
        self.mem_storage.wl().mut_hard_state().set_commit(commit);
    }

    /// Installs a snapshot received from the leader.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.mem_storage.wl().apply_snapshot(snapshot.clone())?;
        self.snapshot = snapshot.clone();
        Ok(())
    }

    /// Records the state machine's snapshot taken at `applied` and compacts
    /// the log up to it.
    pub fn save_snapshot(&mut self, data: Vec<u8>, applied: u64) -> Result<()> {
        let term = self.mem_storage.term(applied)?;
        let conf_state = self.mem_storage.initial_state()?.conf_state;

        let mut snapshot = Snapshot::default();
        snapshot.mut_metadata().index = applied;
        snapshot.mut_metadata().term = term;
        snapshot.mut_metadata().set_conf_state(conf_state);
        snapshot.set_data(data.into());

        self.mem_storage.wl().compact(applied)?;
        self.snapshot = snapshot;
        Ok(())
    }

    /// Index covered by the latest snapshot.
    pub fn snapshot_index(&self) -> u64 {
        self.snapshot.get_metadata().index
    }
}

impl Storage for NodeStorage {
    /// Implements the Storage trait.
    fn initial_state(&self) -> Result<RaftState> {
        self.mem_storage.initial_state()
    }

    /// Implements the Storage trait.
    fn entries(
        &self,
        low: u64,
        high: u64,
        max_size: impl Into<Option<u64>>,
        context: GetEntriesContext,
    ) -> Result<Vec<Entry>> {
        self.mem_storage.entries(low, high, max_size, context)
    }

    /// Implements the Storage trait.
    fn term(&self, idx: u64) -> Result<u64> {
        if idx == self.snapshot_index() {
            return Ok(self.snapshot.get_metadata().term);
        }
        self.mem_storage.term(idx)
    }

    /// Implements the Storage trait.
    fn first_index(&self) -> Result<u64> {
        self.mem_storage.first_index()
    }

    /// Implements the Storage trait.
    fn last_index(&self) -> Result<u64> {
        self.mem_storage.last_index()
    }

    /// Serves the stored state-machine snapshot.
    fn snapshot(&self, request_index: u64, _to: u64) -> Result<Snapshot> {
        if self.snapshot_index() < request_index {
            return Err(raft::Error::Store(
                StorageError::SnapshotTemporarilyUnavailable,
            ));
        }
        Ok(self.snapshot.clone())
    }
}
