#![allow(clippy::field_reassign_with_default)]

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::sync::oneshot::Receiver;
use tokio::sync::oneshot::Sender;

use raft::prelude::*;

use crate::engine::{Applied, ApplyError};

/// `None` is the answer to an applied conf change.
pub type ProposeResult = Result<Option<Applied>, ProposeError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposeError {
    #[error("not the leader, leader is {leader:?}")]
    NotLeader { leader: Option<u64> },

    #[error("proposal dropped: {0}")]
    Dropped(String),

    #[error(transparent)]
    Rejected(#[from] ApplyError),
}

pub struct Proposal {
    pub normal: Option<Vec<u8>>,         // encoded command
    pub conf_change: Option<ConfChange>, // conf change.
    // Index and term of the entry once it's proposed.
    pub proposed: u64,
    pub term: u64,
    pub propose_success: Option<Sender<ProposeResult>>,
}

impl Proposal {
    pub fn conf_change(cc: &ConfChange) -> (Self, Receiver<ProposeResult>) {
        let (tx, rx) = oneshot::channel();
        let proposal = Proposal {
            normal: None,
            conf_change: Some(cc.clone()),
            proposed: 0,
            term: 0,
            propose_success: Some(tx),
        };
        (proposal, rx)
    }

    pub fn normal(data: Vec<u8>) -> (Self, Receiver<ProposeResult>) {
        let (tx, rx) = oneshot::channel();
        let proposal = Proposal {
            normal: Some(data),
            conf_change: None,
            proposed: 0,
            term: 0,
            propose_success: Some(tx),
        };
        (proposal, rx)
    }

    /// Answers the proposer. Later calls are no-ops.
    pub fn respond(&mut self, result: ProposeResult) {
        if let Some(sender) = self.propose_success.take() {
            let _ = sender.send(result);
        }
    }
}
