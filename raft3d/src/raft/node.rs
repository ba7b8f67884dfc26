//! Raft node implementation
//! This module contains the core Raft node implementation: message handling,
//! proposal tracking, snapshotting and state publication.

#![allow(clippy::field_reassign_with_default)]

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::Serialize;
use slog::o;
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

use protobuf::Message as PbMessage;
use raft::{prelude::*, StateRole, INVALID_ID};

use crate::engine::snapshot::{persist_bytes, FileSnapshotSink};
use crate::engine::SnapshotError;
use crate::raft::proposal::{ProposeError, ProposeResult, Proposal};
use crate::raft::StateMachine;

use super::storage::NodeStorage;

// Constants
#[cfg(feature = "slog-term")]
const LOGGER_CHANNEL_SIZE: usize = 4096; // Size of logger channel buffer
const MAILBOX_SIZE: usize = 1000; // Raft messages buffered per node
const PROPOSAL_QUEUE_SIZE: usize = 256;
const CONF_CHANGE_RETRY: Duration = Duration::from_millis(100);

/// Tunables of a raft node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftOptions {
    pub tick_interval: Duration,
    pub election_tick: usize,
    pub heartbeat_tick: usize,
    pub snapshot_interval: Duration,
    /// Where periodic snapshots are exported, if anywhere
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for RaftOptions {
    fn default() -> Self {
        RaftOptions {
            tick_interval: Duration::from_millis(100),
            election_tick: 10, // Number of ticks before starting election
            heartbeat_tick: 3, // Number of ticks between heartbeats
            snapshot_interval: Duration::from_secs(30),
            snapshot_dir: None,
        }
    }
}

/// Raft configuration derived from the node options
fn raft_config(id: u64, applied: u64, options: &RaftOptions) -> Config {
    Config {
        id,
        election_tick: options.election_tick,
        heartbeat_tick: options.heartbeat_tick,
        applied,
        ..Default::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Follower,
    PreCandidate,
    Candidate,
    Leader,
}

impl From<StateRole> for Role {
    fn from(role: StateRole) -> Self {
        match role {
            StateRole::Follower => Role::Follower,
            StateRole::PreCandidate => Role::PreCandidate,
            StateRole::Candidate => Role::Candidate,
            StateRole::Leader => Role::Leader,
        }
    }
}

/// Point-in-time view of a node, published after every loop iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub id: u64,
    pub role: Role,
    pub leader_id: Option<u64>,
    pub term: u64,
    pub applied_index: u64,
    pub snapshot_index: u64,
}

impl NodeStatus {
    fn initial(id: u64) -> Self {
        NodeStatus {
            id,
            role: Role::Follower,
            leader_id: None,
            term: 0,
            applied_index: 0,
            snapshot_index: 0,
        }
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }
}

/// Errors that stop the node loop
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("raft error: {0}")]
    Raft(#[from] raft::Error),

    #[error("failed to restore snapshot: {0}")]
    Restore(#[from] SnapshotError),

    #[error("malformed conf change: {0}")]
    ConfChange(String),
}

/// Channels to a running node
pub struct NodeHandle {
    pub id: u64,
    /// Client proposals, answered through the proposal's oneshot
    pub proposals: Sender<Proposal>,
    /// Inbound raft messages from peers
    pub mailbox: Sender<Message>,
    pub status: watch::Receiver<NodeStatus>,
    task: JoinHandle<Result<(), NodeError>>,
}

impl NodeHandle {
    pub fn status(&self) -> NodeStatus {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

/// Add all followers to the cluster
/// Each node is added through its own conf change. A conf change refused
/// because another one is still pending is retried.
pub async fn add_all_followers(ids: Vec<u64>, proposals: &Sender<Proposal>) -> Result<(), ProposeError> {
    for id in ids {
        let mut conf_change = ConfChange::default();
        conf_change.node_id = id;
        conf_change.set_change_type(ConfChangeType::AddNode);
        loop {
            let (proposal, rx) = Proposal::conf_change(&conf_change);
            if proposals.send(proposal).await.is_err() {
                return Err(ProposeError::Dropped("node stopped".to_string()));
            }
            match rx.await {
                Ok(Ok(_)) => {
                    log::info!("Add follower {}", id);
                    break;
                }
                Ok(Err(e @ ProposeError::NotLeader { .. })) => return Err(e),
                Ok(Err(e)) => {
                    log::warn!("Failed to add follower {}: {}, retrying", id, e);
                    time::sleep(CONF_CHANGE_RETRY).await;
                }
                Err(_) => return Err(ProposeError::Dropped("node stopped".to_string())),
            }
        }
    }
    Ok(())
}

/// Raft node implementation
/// This struct represents a Raft node with its associated state and components
pub struct Node<S: StateMachine> {
    id: u64,
    raft_group: RawNode<NodeStorage>, // The core Raft node implementation
    out_mailbox: Sender<Message>,     // Channel for sending messages to other nodes
    my_mailbox: Receiver<Message>,    // Channel for receiving messages from other nodes
    state_machine: S,                 // The state machine that applies committed entries
    proposals: Receiver<Proposal>,    // Channel for receiving proposals
    proposed: VecDeque<Proposal>,     // Queue of pending proposals
    applied: u64,                     // Last entry handed to the state machine
    options: RaftOptions,
    status: watch::Sender<NodeStatus>,
}

impl<S: StateMachine + Send + 'static> Node<S> {
    /// Start a new raft node
    /// A bootstrapping node forms a single-voter cluster; the others wait to
    /// be added by the leader. Returns the node's handle and the receiver of
    /// its outbound raft messages.
    pub fn start_raft(
        bootstrap: bool,
        id: u64,
        state_machine: S,
        options: RaftOptions,
    ) -> Result<(NodeHandle, Receiver<Message>), NodeError> {
        let logger = raft_logger().new(o!("tag" => format!("peer_{}", id)));

        let storage = NodeStorage::new(bootstrap, id)?;
        let applied = storage.snapshot_index();
        let cfg = raft_config(id, applied, &options);
        let raft_group = RawNode::new(&cfg, storage, &logger)?;

        let (out_tx, out_mailbox) = mpsc::channel(MAILBOX_SIZE);
        let (mailbox, my_mailbox) = mpsc::channel(MAILBOX_SIZE);
        let (proposals, proposal_rx) = mpsc::channel(PROPOSAL_QUEUE_SIZE);
        let (status_tx, status) = watch::channel(NodeStatus::initial(id));

        let mut node = Node {
            id,
            raft_group,
            out_mailbox: out_tx,
            my_mailbox,
            state_machine,
            proposals: proposal_rx,
            proposed: VecDeque::new(),
            applied,
            options,
            status: status_tx,
        };
        node.publish_status();

        let task = tokio::spawn(async move {
            let result = node.run_background_tasks().await;
            if let Err(e) = &result {
                log::error!("raft node {} stopped: {}", id, e);
            }
            result
        });

        let handle = NodeHandle {
            id,
            proposals,
            mailbox,
            status,
            task,
        };
        Ok((handle, out_mailbox))
    }

    /// Run background tasks for the raft node
    /// Main event loop that handles messages, proposals, and periodic tasks.
    /// Returns once every proposal sender is gone.
    async fn run_background_tasks(&mut self) -> Result<(), NodeError> {
        let mut ticker = time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_save_snapshot = Instant::now();

        loop {
            tokio::select! {
                Some(msg) = self.my_mailbox.recv() => {
                    // Process incoming messages
                    self.step(msg);
                    while let Ok(msg) = self.my_mailbox.try_recv() {
                        self.step(msg);
                    }
                }
                proposal = self.proposals.recv() => match proposal {
                    Some(proposal) => {
                        self.propose(proposal);
                        while let Ok(proposal) = self.proposals.try_recv() {
                            self.propose(proposal);
                        }
                    }
                    None => {
                        log::info!("raft node {} shutting down", self.id);
                        return Ok(());
                    }
                },
                _ = ticker.tick() => {
                    self.raft_group.tick();
                }
            }

            // Save snapshot
            if last_save_snapshot.elapsed() >= self.options.snapshot_interval
                && self.applied > self.raft_group.store().snapshot_index()
            {
                self.handle_save_snapshot();
                last_save_snapshot = Instant::now();
            }

            // Process ready state
            self.on_ready()?;
            self.publish_status();
        }
    }

    /// Steps a peer message. Delivery reports from the router are local
    /// messages and go through the report calls instead.
    fn step(&mut self, msg: Message) {
        match msg.get_msg_type() {
            MessageType::MsgSnapStatus => {
                let status = if msg.reject {
                    SnapshotStatus::Failure
                } else {
                    SnapshotStatus::Finish
                };
                self.raft_group.report_snapshot(msg.from, status);
            }
            MessageType::MsgUnreachable => self.raft_group.report_unreachable(msg.from),
            _ => {
                if let Err(e) = self.raft_group.step(msg) {
                    log::debug!("raft node {} ignored message: {}", self.id, e);
                }
            }
        }
    }

    /// Propose a new entry to the raft group
    /// Only the leader accepts proposals. An accepted proposal waits in the
    /// queue, keyed by the index and term of its entry.
    fn propose(&mut self, mut proposal: Proposal) {
        let raft = &self.raft_group.raft;
        if raft.state != StateRole::Leader {
            let leader = (raft.leader_id != INVALID_ID).then_some(raft.leader_id);
            proposal.respond(Err(ProposeError::NotLeader { leader }));
            return;
        }

        let index = raft.raft_log.last_index() + 1;
        let term = raft.term;

        let result = if let Some(data) = proposal.normal.take() {
            self.raft_group.propose(vec![], data)
        } else if let Some(cc) = proposal.conf_change.take() {
            self.raft_group.propose_conf_change(vec![], cc)
        } else {
            proposal.respond(Err(ProposeError::Dropped("empty proposal".to_string())));
            return;
        };

        if let Err(e) = result {
            proposal.respond(Err(ProposeError::Dropped(e.to_string())));
            return;
        }
        if self.raft_group.raft.raft_log.last_index() + 1 == index {
            proposal.respond(Err(ProposeError::Dropped(
                "proposal was not appended".to_string(),
            )));
            return;
        }

        proposal.proposed = index;
        proposal.term = term;
        self.proposed.push_back(proposal);
    }

    /// Process raft ready state
    /// Handles the ready state of the Raft node, including message processing,
    /// snapshot handling, and state persistence
    fn on_ready(&mut self) -> Result<(), NodeError> {
        if !self.raft_group.has_ready() {
            return Ok(());
        }

        let mut ready = self.raft_group.ready();

        // Step 1: Handle messages
        if !ready.messages().is_empty() {
            Self::handle_out_messages(&self.out_mailbox, ready.take_messages());
        }

        // Step 2: Handle snapshot if any
        if *ready.snapshot() != Snapshot::default() {
            self.handle_snapshot(ready.snapshot().clone())?;
        }

        // Step 3: Handle committed entries
        self.handle_committed_entries(ready.take_committed_entries())?;

        // Step 4: Persist raft state
        {
            let store = self.raft_group.mut_store();
            store.append_entries(ready.entries())?;
            if let Some(hs) = ready.hs() {
                store.set_hardstate(hs.clone());
            }
        }
        if !ready.persisted_messages().is_empty() {
            Self::handle_out_messages(&self.out_mailbox, ready.take_persisted_messages());
        }

        // Step 5: Advance raft state
        let mut light_rd = self.raft_group.advance(ready);
        if let Some(commit) = light_rd.commit_index() {
            self.raft_group.mut_store().set_commit(commit);
        }
        Self::handle_out_messages(&self.out_mailbox, light_rd.take_messages());
        self.handle_committed_entries(light_rd.take_committed_entries())?;

        self.raft_group.advance_apply();
        Ok(())
    }

    /// Process committed entries
    /// Hands entries to the state machine in log order, applies configuration
    /// changes and answers the matching proposals.
    fn handle_committed_entries(&mut self, entries: Vec<Entry>) -> Result<(), NodeError> {
        for entry in entries {
            if entry.index <= self.applied {
                continue;
            }

            if entry.data.is_empty() {
                // Leader's empty entry, or a conf change raft refused.
                self.applied = entry.index;
                self.notice_proposed(
                    &entry,
                    Err(ProposeError::Dropped("entry carried no command".to_string())),
                );
                continue;
            }

            let result = match entry.get_entry_type() {
                EntryType::EntryConfChange => {
                    let mut cc = ConfChange::default();
                    cc.merge_from_bytes(&entry.data)
                        .map_err(|e| NodeError::ConfChange(e.to_string()))?;
                    let cs = self.raft_group.apply_conf_change(&cc)?;
                    self.raft_group.mut_store().set_conf_state(cs);
                    // A joining node only accepts a snapshot that lists it.
                    self.applied = entry.index;
                    self.handle_save_snapshot();
                    Ok(None)
                }
                EntryType::EntryConfChangeV2 => {
                    log::warn!("raft node {} skipped conf change v2 at {}", self.id, entry.index);
                    Err(ProposeError::Dropped("unsupported conf change".to_string()))
                }
                EntryType::EntryNormal => self
                    .state_machine
                    .apply(entry.index, &entry.data)
                    .map(Some)
                    .map_err(ProposeError::from),
            };

            self.applied = entry.index;
            self.notice_proposed(&entry, result);
        }
        Ok(())
    }

    /// Notify proposals about their status
    /// The proposal made at the entry's index and term gets `result`. Any
    /// other proposal at or below that index lost its slot to another term.
    fn notice_proposed(&mut self, entry: &Entry, result: ProposeResult) {
        let mut i = 0;
        while i < self.proposed.len() {
            if self.proposed[i].proposed > entry.index {
                i += 1;
                continue;
            }
            if let Some(mut proposal) = self.proposed.remove(i) {
                if proposal.proposed == entry.index && proposal.term == entry.term {
                    proposal.respond(result.clone());
                } else {
                    proposal.respond(Err(ProposeError::Dropped(format!(
                        "entry {} was replaced in term {}",
                        proposal.proposed, entry.term
                    ))));
                }
            }
        }
    }

    /// Handle raft messages
    /// Sends messages to other nodes in the cluster
    fn handle_out_messages(sender: &Sender<Message>, messages: Vec<Message>) {
        for msg in messages {
            if let Err(e) = sender.try_send(msg) {
                log::error!("Failed to send raft message {:?}, Raft will retry", e);
            }
        }
    }

    /// Handle snapshot
    /// Installs a snapshot from the leader into storage and the state machine
    fn handle_snapshot(&mut self, snapshot: Snapshot) -> Result<(), NodeError> {
        let metadata = snapshot.get_metadata().clone();
        self.raft_group.mut_store().apply_snapshot(&snapshot)?;
        self.state_machine
            .on_snapshot(metadata.index, metadata.term, snapshot.get_data())?;
        self.applied = metadata.index;

        // Entries covered by the snapshot are never seen individually.
        let index = metadata.index;
        self.proposed.retain_mut(|proposal| {
            if proposal.proposed > index {
                return true;
            }
            proposal.respond(Err(ProposeError::Dropped(format!(
                "entry {} was covered by snapshot {}",
                proposal.proposed, index
            ))));
            false
        });
        log::info!("raft node {} installed snapshot at index {}", self.id, index);
        Ok(())
    }

    /// Handle save snapshot
    /// Serialises the state machine, compacts the log and exports the
    /// snapshot when a directory is configured. Failures are logged and
    /// retried at the next interval.
    fn handle_save_snapshot(&mut self) {
        let data = match self.state_machine.snapshot() {
            Ok(data) => data,
            Err(e) => {
                log::error!("raft node {} failed to take snapshot: {}", self.id, e);
                return;
            }
        };

        if let Some(dir) = &self.options.snapshot_dir {
            let dir = dir.join(format!("node_{}", self.id));
            let exported = FileSnapshotSink::create(&dir)
                .map_err(SnapshotError::from)
                .and_then(|mut sink| persist_bytes(&data, &mut sink));
            if let Err(e) = exported {
                log::error!("raft node {} failed to export snapshot: {}", self.id, e);
            }
        }

        let applied = self.applied;
        match self.raft_group.mut_store().save_snapshot(data, applied) {
            Ok(()) => log::info!("Save snapshot at index: {}", applied),
            Err(e) => log::error!("raft node {} failed to save snapshot: {}", self.id, e),
        }
    }

    fn publish_status(&mut self) {
        let raft = &self.raft_group.raft;
        let status = NodeStatus {
            id: self.id,
            role: raft.state.into(),
            leader_id: (raft.leader_id != INVALID_ID).then_some(raft.leader_id),
            term: raft.term,
            applied_index: self.applied,
            snapshot_index: raft.raft_log.store.snapshot_index(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

#[cfg(feature = "slog-term")]
fn raft_logger() -> slog::Logger {
    use slog::Drain;

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain)
        .chan_size(LOGGER_CHANNEL_SIZE)
        .overflow_strategy(slog_async::OverflowStrategy::Block)
        .build()
        .fuse();
    slog::Logger::root(drain, o!())
}

#[cfg(not(feature = "slog-term"))]
fn raft_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::entry::Printer;
    use crate::engine::{Applied, ApplyError, Command, EntityKind};
    use crate::raft::router::LocalRouter;
    use crate::state_inventory::StateInventory;

    fn fast_options() -> RaftOptions {
        RaftOptions {
            tick_interval: Duration::from_millis(10),
            ..RaftOptions::default()
        }
    }

    async fn wait_for_leader(handle: &NodeHandle) {
        let mut status = handle.status.clone();
        time::timeout(Duration::from_secs(10), async {
            while !status.borrow().is_leader() {
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
    }

    async fn propose(handle: &NodeHandle, cmd: Command) -> ProposeResult {
        let (proposal, rx) = Proposal::normal(cmd.encode().unwrap());
        handle.proposals.send(proposal).await.unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_single_node_applies_proposals() {
        let state = StateInventory::new();
        let store = state.store();
        let (handle, _out) = Node::start_raft(true, 1, state, fast_options()).unwrap();
        wait_for_leader(&handle).await;

        let printer = Printer::new("p1", "Prusa", "MK4");
        let result = propose(&handle, Command::create_printer(&printer).unwrap()).await;
        assert_eq!(result, Ok(Some(Applied::Printer(printer.clone()))));
        assert_eq!(store.printer("p1"), Some(printer));

        let result = propose(&handle, Command::delete(EntityKind::Filament, "f1").unwrap()).await;
        assert!(matches!(
            result,
            Err(ProposeError::Rejected(ApplyError::NotFound { .. }))
        ));
        assert_eq!(handle.status().leader_id, Some(1));
        handle.stop();
    }

    #[tokio::test]
    async fn test_unjoined_node_rejects_proposals() {
        let (handle, _out) =
            Node::start_raft(false, 2, StateInventory::new(), fast_options()).unwrap();
        let printer = Printer::new("p1", "Prusa", "MK4");
        let result = propose(&handle, Command::create_printer(&printer).unwrap()).await;
        assert_eq!(result, Err(ProposeError::NotLeader { leader: None }));
        handle.stop();
    }

    #[tokio::test]
    async fn test_periodic_snapshot_compacts_and_exports() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = RaftOptions {
            snapshot_interval: Duration::from_millis(50),
            snapshot_dir: Some(dir.path().to_path_buf()),
            ..fast_options()
        };
        let (handle, _out) = Node::start_raft(true, 1, StateInventory::new(), options).unwrap();
        wait_for_leader(&handle).await;
        let printer = Printer::new("p1", "Prusa", "MK4");
        propose(&handle, Command::create_printer(&printer).unwrap())
            .await
            .unwrap();
        // The bootstrap snapshot already covers index 1.
        let applied = handle.status().applied_index.max(2);

        let mut status = handle.status.clone();
        time::timeout(Duration::from_secs(10), async {
            while status.borrow().snapshot_index < applied {
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert!(dir.path().join("node_1").join("snapshot").exists());
        handle.stop();
    }

    #[tokio::test]
    async fn test_follower_joins_through_snapshot() {
        let router = LocalRouter::new();
        let follower_state = StateInventory::new();
        let follower_store = follower_state.store();
        let (leader, leader_out) =
            Node::start_raft(true, 1, StateInventory::new(), fast_options()).unwrap();
        let (follower, follower_out) =
            Node::start_raft(false, 2, follower_state, fast_options()).unwrap();
        router.register(1, leader.mailbox.clone());
        router.register(2, follower.mailbox.clone());
        let forwarders = [
            router.spawn_forwarder(leader_out),
            router.spawn_forwarder(follower_out),
        ];

        wait_for_leader(&leader).await;
        let printer = Printer::new("p1", "Prusa", "MK4");
        propose(&leader, Command::create_printer(&printer).unwrap())
            .await
            .unwrap();
        add_all_followers(vec![2], &leader.proposals).await.unwrap();

        // Two voters now: this commits only once node 2 has joined.
        let second = Printer::new("p2", "Voron", "2.4");
        time::timeout(
            Duration::from_secs(10),
            propose(&leader, Command::create_printer(&second).unwrap()),
        )
        .await
        .unwrap()
        .unwrap();

        let applied = leader.status().applied_index;
        let mut status = follower.status.clone();
        time::timeout(Duration::from_secs(10), async {
            while status.borrow().applied_index < applied {
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let joined = follower.status();
        assert!(joined.snapshot_index > 1);
        assert_eq!(joined.leader_id, Some(1));
        assert_eq!(follower_store.printer("p1"), Some(printer));
        assert_eq!(follower_store.printer("p2"), Some(second));

        for forwarder in forwarders {
            forwarder.abort();
        }
        leader.stop();
        follower.stop();
    }
}
