//! In-process message routing between raft nodes
//!
//! Every node hosted by this process registers its inbound mailbox; one
//! forwarder per node drains its outbound messages and delivers them by
//! `msg.to`. Isolating a node drops all traffic to and from it.
//!
//! A snapshot that cannot be delivered is answered to its sender with a
//! rejected `MsgSnapStatus`, so the leader goes back to probing the peer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use raft::prelude::{Message, MessageType};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Routes {
    mailboxes: HashMap<u64, Sender<Message>>,
    isolated: HashSet<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalRouter {
    routes: Arc<Mutex<Routes>>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_routes<R>(&self, f: impl FnOnce(&mut Routes) -> R) -> R {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut routes)
    }

    pub fn register(&self, id: u64, mailbox: Sender<Message>) {
        self.with_routes(|routes| {
            routes.mailboxes.insert(id, mailbox);
        });
    }

    /// Cuts `id` off from every other node.
    pub fn isolate(&self, id: u64) {
        log::info!("isolating raft node {}", id);
        self.with_routes(|routes| {
            routes.isolated.insert(id);
        });
    }

    pub fn heal(&self, id: u64) {
        log::info!("reconnecting raft node {}", id);
        self.with_routes(|routes| {
            routes.isolated.remove(&id);
        });
    }

    /// Delivers one message. Returns false when it was dropped.
    pub fn route(&self, msg: Message) -> bool {
        let (from, to) = (msg.from, msg.to);
        let is_snapshot = msg.get_msg_type() == MessageType::MsgSnapshot;
        let mailbox = self.with_routes(|routes| {
            if routes.isolated.contains(&from) || routes.isolated.contains(&to) {
                return None;
            }
            routes.mailboxes.get(&to).cloned()
        });
        let delivered = match mailbox {
            Some(mailbox) => match mailbox.try_send(msg) {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("Failed to deliver raft message: {}", e);
                    false
                }
            },
            None => false,
        };
        if !delivered && is_snapshot {
            self.report_snapshot_failure(from, to);
        }
        delivered
    }

    /// Tells `leader` that its snapshot for `peer` was lost. The report is
    /// local to the leader and ignores isolation.
    fn report_snapshot_failure(&self, leader: u64, peer: u64) {
        let Some(mailbox) = self.with_routes(|routes| routes.mailboxes.get(&leader).cloned()) else {
            return;
        };
        let mut status = Message::default();
        status.set_msg_type(MessageType::MsgSnapStatus);
        status.from = peer;
        status.to = leader;
        status.reject = true;
        if let Err(e) = mailbox.try_send(status) {
            log::warn!("Failed to report lost snapshot for {}: {}", peer, e);
        }
    }

    /// Forwards everything `out_mailbox` yields until the node stops.
    pub fn spawn_forwarder(&self, mut out_mailbox: Receiver<Message>) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_mailbox.recv().await {
                router.route(msg);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn message(from: u64, to: u64) -> Message {
        let mut msg = Message::default();
        msg.from = from;
        msg.to = to;
        msg
    }

    #[test]
    fn test_route_by_destination() {
        let router = LocalRouter::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        router.register(1, tx1);
        router.register(2, tx2);

        assert!(router.route(message(1, 2)));
        assert_eq!(rx2.try_recv().unwrap().from, 1);
        assert!(rx1.try_recv().is_err());
        assert!(!router.route(message(1, 3)));
    }

    #[test]
    fn test_isolated_node_is_cut_off() {
        let router = LocalRouter::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        router.register(1, tx1);
        router.register(2, tx2);

        router.isolate(2);
        assert!(!router.route(message(1, 2)));
        assert!(!router.route(message(2, 1)));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());

        router.heal(2);
        assert!(router.route(message(2, 1)));
        assert_eq!(rx1.try_recv().unwrap().from, 2);
    }

    #[test]
    fn test_lost_snapshot_is_reported_to_sender() {
        let router = LocalRouter::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        router.register(1, tx1);
        router.register(2, tx2);
        router.isolate(2);

        let mut snapshot = message(1, 2);
        snapshot.set_msg_type(MessageType::MsgSnapshot);
        assert!(!router.route(snapshot));
        assert!(rx2.try_recv().is_err());

        let status = rx1.try_recv().unwrap();
        assert_eq!(status.get_msg_type(), MessageType::MsgSnapStatus);
        assert_eq!((status.from, status.to), (2, 1));
        assert!(status.reject);

        // Other lost messages are not reported.
        assert!(!router.route(message(1, 2)));
        assert!(rx1.try_recv().is_err());
    }
}
