use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Follower => write!(f, "follower"),
            NodeRole::Candidate => write!(f, "candidate"),
            NodeRole::Leader => write!(f, "leader"),
        }
    }
}

/// Mutable protocol state of a single node.
///
/// There is no term counter: `has_voted` is the only guard against voting
/// twice and it is cleared solely when a candidacy is rejected by a majority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub role: NodeRole,
    pub value: u8,
    pub has_voted: bool,
    pub vote_success: usize,
    pub vote_failed: usize,
    pub proposal_armed: bool,
    pub proposal_sent: bool,
    /// Follower side: the proposal heartbeat has been applied.
    pub committed: bool,
    /// Leader side: a majority acknowledged the proposal.
    pub consensus_reached: bool,
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            role: NodeRole::Follower,
            value: 0,
            has_voted: false,
            vote_success: 0,
            vote_failed: 0,
            proposal_armed: false,
            proposal_sent: false,
            committed: false,
            consensus_reached: false,
        }
    }

    pub fn reset_tally(&mut self) {
        self.vote_success = 0;
        self.vote_failed = 0;
    }

    pub fn tally(&self) -> usize {
        self.vote_success + self.vote_failed
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}
