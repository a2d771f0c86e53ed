//! Static cluster configuration: the peer-address table and the tunable
//! timing thresholds, with no designated leader.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

mod defaults {
    pub fn heartbeat_interval_ms() -> u64 {
        2_000
    }
    pub fn timeout_heartbeat_ms() -> u64 {
        7_000
    }
    pub fn rpc_timeout_ms() -> u64 {
        10_000
    }
    pub fn quorum_poll_interval_ms() -> u64 {
        100
    }
    pub fn worker_pool_size() -> usize {
        30
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This peer's identity; must be a key of `peers`.
    pub name: String,
    /// The static universe: every peer's name and bind address, including this one.
    pub peers: BTreeMap<String, SocketAddr>,

    #[serde(default = "defaults::heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "defaults::timeout_heartbeat_ms")]
    pub timeout_heartbeat_ms: u64,
    #[serde(default = "defaults::rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "defaults::quorum_poll_interval_ms")]
    pub quorum_poll_interval_ms: u64,
    #[serde(default = "defaults::worker_pool_size")]
    pub worker_pool_size: usize,
}

impl Config {
    /// A default four-peer universe bound to successive localhost ports, for
    /// the demo binary.
    pub fn demo(name: &str) -> Self {
        let names = ["PeerA", "PeerB", "PeerC", "PeerD"];
        let peers = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.to_string(), format!("127.0.0.1:{}", 7700 + i).parse().unwrap()))
            .collect();
        Config {
            name: name.to_string(),
            peers,
            heartbeat_interval_ms: defaults::heartbeat_interval_ms(),
            timeout_heartbeat_ms: defaults::timeout_heartbeat_ms(),
            rpc_timeout_ms: defaults::rpc_timeout_ms(),
            quorum_poll_interval_ms: defaults::quorum_poll_interval_ms(),
            worker_pool_size: defaults::worker_pool_size(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.display().to_string(), e))?;
        Self::from_toml_str(&contents)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn timeout_heartbeat(&self) -> Duration {
        Duration::from_millis(self.timeout_heartbeat_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn quorum_poll_interval(&self) -> Duration {
        Duration::from_millis(self.quorum_poll_interval_ms)
    }

    /// The static universe minus self.
    pub fn all_peer_names(&self) -> Vec<String> {
        self.peers.keys().filter(|n| **n != self.name).cloned().collect()
    }

    pub fn addr_of(&self, name: &str) -> Option<SocketAddr> {
        self.peers.get(name).copied()
    }

    pub fn bind_addr(&self) -> Option<SocketAddr> {
        self.addr_of(&self.name)
    }
}
