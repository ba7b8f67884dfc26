use anyhow::{bail, Context};
use log::warn;
use serde_derive::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::raft::node::RaftOptions;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub id: u64,
    pub addr: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub bootstrap_id: u64,
    pub node_list: Vec<NodeConfig>,
    pub tick_interval_ms: u64,
    pub election_tick: usize,
    pub heartbeat_tick: usize,
    pub snapshot_interval_secs: u64,
    pub propose_timeout_ms: u64,
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig::new()
    }
}

impl RuntimeConfig {
    /// Single node listening on 127.0.0.1:8000.
    pub fn new() -> Self {
        RuntimeConfig {
            bootstrap_id: 1,
            node_list: vec![NodeConfig {
                id: 1,
                addr: "127.0.0.1:8000".to_string(),
            }],
            tick_interval_ms: 100,
            election_tick: 10,
            heartbeat_tick: 3,
            snapshot_interval_secs: 30,
            propose_timeout_ms: 5000,
            snapshot_dir: None,
        }
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(contents).context("malformed runtime config")?;
        Ok(config)
    }

    /// Reads the config at `path`. A missing file yields the defaults.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "Something went wrong reading the runtime config file {}, {:?}, using defaults",
                    path.display(),
                    e
                );
                return Ok(RuntimeConfig::new());
            }
        };
        Self::parse(&contents).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_list.is_empty() {
            bail!("node_list is empty");
        }
        let mut ids = HashSet::new();
        for node in &self.node_list {
            if node.id == 0 {
                bail!("node id 0 is reserved");
            }
            if !ids.insert(node.id) {
                bail!("duplicate node id {}", node.id);
            }
        }
        if !ids.contains(&self.bootstrap_id) {
            bail!("bootstrap_id {} is not in node_list", self.bootstrap_id);
        }
        if self.election_tick <= self.heartbeat_tick {
            bail!(
                "election_tick ({}) must be greater than heartbeat_tick ({})",
                self.election_tick,
                self.heartbeat_tick
            );
        }
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn raft_options(&self) -> RaftOptions {
        RaftOptions {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            election_tick: self.election_tick,
            heartbeat_tick: self.heartbeat_tick,
            snapshot_interval: Duration::from_secs(self.snapshot_interval_secs),
            snapshot_dir: self.snapshot_dir.clone(),
        }
    }

    pub fn propose_timeout(&self) -> Duration {
        Duration::from_millis(self.propose_timeout_ms)
    }

    /// HTTP address of every node, by raft id
    pub fn peer_addrs(&self) -> HashMap<u64, String> {
        self.node_list
            .iter()
            .map(|node| (node.id, node.addr.clone()))
            .collect()
    }
}
