use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::raft::{NodeId, RaftConfig, RaftError};
use crate::sim::NetworkConfig;

/// Cluster description loaded from a JSON file. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub nodes: usize,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub proposal_delay_ms: u64,
    /// Per-node election timeout ranges, e.g. to pick who times out first.
    pub overrides: Vec<NodeOverride>,
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOverride {
    pub id: NodeId,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub seed: u64,
    pub max_delivery_delay_ms: u64,
    pub fragment_payloads: bool,
    pub duration_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            max_delivery_delay_ms: 5,
            fragment_payloads: false,
            duration_ms: 11_000,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 20,
            proposal_delay_ms: 10_000,
            overrides: Vec::new(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl ClusterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RaftError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, RaftError> {
        serde_json::from_str(raw).map_err(|e| RaftError::SerializationError(e.to_string()))
    }

    /// One validated configuration per node, node `i` at position `i`.
    pub fn node_configs(&self) -> Result<Vec<RaftConfig>, RaftError> {
        for entry in &self.overrides {
            if entry.id as usize >= self.nodes {
                return Err(RaftError::UnknownNode(entry.id));
            }
        }

        (0..self.nodes)
            .map(|index| {
                let id = NodeId::try_from(index).map_err(|_| {
                    RaftError::InvalidConfig(format!("too many nodes: {}", self.nodes))
                })?;

                let mut cfg = RaftConfig::for_cluster(id, self.nodes)
                    .with_election_timeout(self.election_timeout_min_ms, self.election_timeout_max_ms)
                    .with_proposal_delay(self.proposal_delay_ms);
                cfg.heartbeat_interval = self.heartbeat_interval_ms;

                if let Some(entry) = self.overrides.iter().find(|o| o.id == id) {
                    cfg = cfg.with_election_timeout(
                        entry.election_timeout_min_ms,
                        entry.election_timeout_max_ms,
                    );
                }

                cfg.validate()?;
                Ok(cfg)
            })
            .collect()
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            max_delivery_delay_ms: self.simulation.max_delivery_delay_ms,
            fragment_payloads: self.simulation.fragment_payloads,
        }
    }
}
