use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use hyper::service::{make_service_fn, service_fn};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use crate::api::{self, ApiState};
use crate::config::RuntimeConfig;
use crate::engine::Store;
use crate::metrics;
use crate::raft::node::{add_all_followers, Node, NodeHandle};
use crate::raft::router::LocalRouter;
use crate::service::InventoryService;
use crate::state_inventory::StateInventory;

const JOIN_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// One raft node hosted by the server, with the store it applies into
pub struct HostedNode {
    pub handle: NodeHandle,
    pub store: Arc<Store>,
    pub service: InventoryService,
}

/// Every configured node, running in this process
pub struct Server {
    nodes: HashMap<u64, HostedNode>,
    router: LocalRouter,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Starts the raft nodes and their HTTP servers. The bootstrap node adds
    /// the others as voters once it leads.
    pub async fn start(config: &RuntimeConfig) -> anyhow::Result<Server> {
        let mut server = Self::start_cluster(config)?;
        server.start_http_servers(config)?;
        log::info!("server started with {} nodes", server.nodes.len());
        Ok(server)
    }

    /// Starts the raft nodes and the join of the followers, without HTTP.
    pub fn start_cluster(config: &RuntimeConfig) -> anyhow::Result<Server> {
        config.validate()?;
        metrics::init_registry();

        let router = LocalRouter::new();
        let mut nodes = HashMap::new();
        let mut tasks = Vec::new();
        for node in &config.node_list {
            let state = StateInventory::new();
            let store = state.store();
            let (handle, out_mailbox) = Node::start_raft(
                node.id == config.bootstrap_id,
                node.id,
                state,
                config.raft_options(),
            )
            .with_context(|| format!("failed to start raft node {}", node.id))?;
            router.register(node.id, handle.mailbox.clone());
            tasks.push(router.spawn_forwarder(out_mailbox));

            let service = InventoryService::for_node(&handle, store.clone(), config.propose_timeout());
            nodes.insert(
                node.id,
                HostedNode {
                    handle,
                    store,
                    service,
                },
            );
        }

        let mut server = Server {
            nodes,
            router,
            tasks,
        };
        server.join_followers(config);
        Ok(server)
    }

    pub fn node(&self, id: u64) -> Option<&HostedNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &HostedNode> {
        self.nodes.values()
    }

    pub fn router(&self) -> &LocalRouter {
        &self.router
    }

    /// Id of the leader with the highest term among the hosted nodes
    pub fn leader(&self) -> Option<u64> {
        self.nodes
            .values()
            .map(|node| node.handle.status())
            .filter(|status| status.is_leader())
            .max_by_key(|status| status.term)
            .map(|status| status.id)
    }

    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        for node in self.nodes.values() {
            node.handle.stop();
        }
        log::info!("server stop");
    }

    fn join_followers(&mut self, config: &RuntimeConfig) {
        let Some(bootstrap) = self.nodes.get(&config.bootstrap_id) else {
            return;
        };
        let ids: Vec<u64> = config
            .node_list
            .iter()
            .map(|n| n.id)
            .filter(|id| *id != config.bootstrap_id)
            .collect();
        if ids.is_empty() {
            return;
        }

        let proposals = bootstrap.handle.proposals.clone();
        let mut status = bootstrap.handle.status.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                while !status.borrow().is_leader() {
                    if status.changed().await.is_err() {
                        return;
                    }
                }
                match add_all_followers(ids.clone(), &proposals).await {
                    Ok(()) => return,
                    Err(e) => {
                        log::warn!("failed to add followers: {}, retrying", e);
                        time::sleep(JOIN_RETRY_INTERVAL).await;
                    }
                }
            }
        }));
    }

    fn start_http_servers(&mut self, config: &RuntimeConfig) -> anyhow::Result<()> {
        let peers = config.peer_addrs();
        for node in &config.node_list {
            let addr: SocketAddr = node
                .addr
                .parse()
                .with_context(|| format!("invalid address {} for node {}", node.addr, node.id))?;
            let hosted = self
                .nodes
                .get(&node.id)
                .with_context(|| format!("node {} is not running", node.id))?;
            let state = Arc::new(ApiState {
                service: hosted.service.clone(),
                peers: peers.clone(),
            });

            let make_svc = make_service_fn(move |_| {
                let state = state.clone();
                async move {
                    Ok::<_, Infallible>(service_fn(move |req| api::route(req, state.clone())))
                }
            });
            let server = hyper::Server::try_bind(&addr)
                .with_context(|| format!("failed to bind {}", addr))?
                .serve(make_svc);
            self.tasks.push(tokio::spawn(async move {
                if let Err(e) = server.await {
                    log::error!("http server on {} failed: {}", addr, e);
                }
            }));
            log::info!("http server for node {} started on {}", node.id, addr);
        }
        Ok(())
    }
}
