use std::collections::HashSet;
use std::time::Duration;

use super::{NodeId, RaftError};

/// Largest identifier that still fits in a single message slot.
pub const MAX_NODE_ID: NodeId = 9;

#[derive(Debug, Clone)]
pub struct RaftConfig {
    pub node_id: NodeId,
    pub cluster_size: usize,
    pub peers: Vec<NodeId>,
    pub election_timeout_min: u64, // in milliseconds, inclusive
    pub election_timeout_max: u64, // in milliseconds, exclusive
    pub heartbeat_interval: u64,   // in milliseconds
    pub proposal_delay: u64,       // in milliseconds
}

impl RaftConfig {
    pub fn new(node_id: NodeId, cluster_size: usize) -> Self {
        Self {
            node_id,
            cluster_size,
            peers: Vec::new(),
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 20,
            proposal_delay: 10_000,
        }
    }

    /// Builds the configuration of `node_id` in a cluster made of nodes
    /// `0..cluster_size`, every other node being a peer.
    pub fn for_cluster(node_id: NodeId, cluster_size: usize) -> Self {
        let mut config = Self::new(node_id, cluster_size);
        for peer in 0..cluster_size {
            let peer = peer as NodeId;
            if peer != node_id {
                config.add_peer(peer);
            }
        }
        config
    }

    pub fn add_peer(&mut self, peer_id: NodeId) {
        self.peers.push(peer_id);
    }

    pub fn with_election_timeout(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.election_timeout_min = min_ms;
        self.election_timeout_max = max_ms;
        self
    }

    pub fn with_proposal_delay(mut self, delay_ms: u64) -> Self {
        self.proposal_delay = delay_ms;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    pub fn proposal_delay(&self) -> Duration {
        Duration::from_millis(self.proposal_delay)
    }

    pub fn validate(&self) -> Result<(), RaftError> {
        if self.cluster_size == 0 {
            return Err(RaftError::InvalidConfig(
                "cluster size must be at least 1".to_string(),
            ));
        }
        if self.node_id > MAX_NODE_ID {
            return Err(RaftError::InvalidConfig(format!(
                "node id {} does not fit in a message slot (max {MAX_NODE_ID})",
                self.node_id
            )));
        }
        if self.peers.len() + 1 != self.cluster_size {
            return Err(RaftError::InvalidConfig(format!(
                "cluster of {} nodes needs {} peers, got {}",
                self.cluster_size,
                self.cluster_size - 1,
                self.peers.len()
            )));
        }

        let mut seen = HashSet::new();
        for &peer in &self.peers {
            if peer == self.node_id {
                return Err(RaftError::InvalidConfig(format!(
                    "node {peer} lists itself as a peer"
                )));
            }
            if peer > MAX_NODE_ID {
                return Err(RaftError::InvalidConfig(format!(
                    "peer id {peer} does not fit in a message slot"
                )));
            }
            if !seen.insert(peer) {
                return Err(RaftError::InvalidConfig(format!("duplicate peer {peer}")));
            }
        }

        if self.election_timeout_min >= self.election_timeout_max {
            return Err(RaftError::InvalidConfig(format!(
                "election timeout range [{}, {}) is empty",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval == 0 {
            return Err(RaftError::InvalidConfig(
                "heartbeat interval must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_timings() {
        let cfg = RaftConfig::new(0, 1);
        assert_eq!(cfg.election_timeout_min, 150);
        assert_eq!(cfg.election_timeout_max, 300);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(20));
        assert_eq!(cfg.proposal_delay(), Duration::from_secs(10));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn for_cluster_lists_every_other_node() {
        let cfg = RaftConfig::for_cluster(2, 4);
        assert_eq!(cfg.peers, vec![0, 1, 3]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_topologies() {
        let mut cfg = RaftConfig::for_cluster(0, 3);
        cfg.add_peer(2);
        assert!(matches!(cfg.validate(), Err(RaftError::InvalidConfig(_))));

        let mut cfg = RaftConfig::new(1, 2);
        cfg.add_peer(1);
        assert!(matches!(cfg.validate(), Err(RaftError::InvalidConfig(_))));

        let cfg = RaftConfig::for_cluster(10, 11);
        assert!(matches!(cfg.validate(), Err(RaftError::InvalidConfig(_))));

        let cfg = RaftConfig::new(0, 0);
        assert!(matches!(cfg.validate(), Err(RaftError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_empty_timeout_range() {
        let cfg = RaftConfig::for_cluster(0, 3).with_election_timeout(200, 200);
        assert!(matches!(cfg.validate(), Err(RaftError::InvalidConfig(_))));
    }
}
