use rand::rngs::StdRng;
use rand::SeedableRng;
use log::{debug, info, warn};

use super::message::{FrameBuffer, HeartbeatKind, RaftMessage, VoteStatus};
use super::timer::random_election_timeout;
use super::{NodeId, NodeRole, NodeState, Ports, RaftConfig, RaftError, TimerHandle, TimerEvent};

/// `votes` (own vote included) is a strict majority of `cluster_size`.
pub fn is_majority(votes: usize, cluster_size: usize) -> bool {
    votes > cluster_size / 2
}

/// Number of heartbeat responses the leader gathers before it judges the
/// proposal. Peers other than the leader and the last node it heard from;
/// never less than one so small clusters still get a verdict.
pub fn ack_window(cluster_size: usize) -> usize {
    cluster_size.saturating_sub(2).max(1)
}

pub struct RaftNode {
    // Node identity
    id: NodeId,

    // Configuration
    config: RaftConfig,

    // Protocol state
    state: NodeState,

    // Inbound bytes not yet forming a whole frame, per sender
    frames: FrameBuffer,
    rng: StdRng,

    // Currently armed timers
    election_timer: Option<TimerHandle>,
    heartbeat_timer: Option<TimerHandle>,
    proposal_timer: Option<TimerHandle>,
}

impl RaftNode {
    pub fn new(config: RaftConfig) -> Result<Self, RaftError> {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Creates a node whose election timeouts are reproducible.
    pub fn with_seed(config: RaftConfig, seed: u64) -> Result<Self, RaftError> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: RaftConfig, rng: StdRng) -> Result<Self, RaftError> {
        config.validate()?;

        Ok(Self {
            id: config.node_id,
            config,
            state: NodeState::new(),
            frames: FrameBuffer::new(),
            rng,
            election_timer: None,
            heartbeat_timer: None,
            proposal_timer: None,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &RaftConfig {
        &self.config
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn role(&self) -> NodeRole {
        self.state.role
    }

    pub fn value(&self) -> u8 {
        self.state.value
    }

    pub fn has_voted(&self) -> bool {
        self.state.has_voted
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.state.role, NodeRole::Leader)
    }

    pub fn election_timer(&self) -> Option<TimerHandle> {
        self.election_timer
    }

    pub fn heartbeat_timer(&self) -> Option<TimerHandle> {
        self.heartbeat_timer
    }

    /// Resets the protocol state and arms the first election timeout.
    pub fn start<P: Ports>(&mut self, ports: &mut P) {
        self.state = NodeState::new();
        for handle in [
            self.election_timer.take(),
            self.heartbeat_timer.take(),
            self.proposal_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            ports.cancel(handle);
        }

        self.arm_election_timer(ports);
        debug!("node {} started as follower", self.id);
    }

    pub fn on_timer<P: Ports>(&mut self, handle: TimerHandle, event: TimerEvent, ports: &mut P) {
        let slot = match event {
            TimerEvent::Election => &mut self.election_timer,
            TimerEvent::Heartbeat => &mut self.heartbeat_timer,
            TimerEvent::ArmProposal => &mut self.proposal_timer,
        };
        if *slot != Some(handle) {
            debug!("node {}: ignoring stale {event:?} timer {handle}", self.id);
            return;
        }
        *slot = None;

        match event {
            TimerEvent::Election => self.start_election(ports),
            TimerEvent::Heartbeat => self.send_heartbeat(ports),
            TimerEvent::ArmProposal => self.arm_proposal(),
        }
    }

    /// Feeds raw bytes received from `from`. Incomplete frames are kept until
    /// the rest arrives; complete frames ahead of malformed input are still
    /// handled, the malformed rest is logged and dropped.
    pub fn on_message<P: Ports>(&mut self, from: NodeId, bytes: &[u8], ports: &mut P) {
        let (messages, error) = self.frames.push(from, bytes);
        for message in messages {
            self.handle_message(from, message, ports);
        }
        if let Some(e) = error {
            warn!("node {}: discarding input from node {from}: {e}", self.id);
        }
    }

    pub fn handle_message<P: Ports>(&mut self, from: NodeId, message: RaftMessage, ports: &mut P) {
        debug!("node {} received {message:?} from node {from}", self.id);

        match message {
            RaftMessage::VoteRequest { candidate_id } => {
                self.handle_vote_request(from, candidate_id, ports)
            }
            RaftMessage::VoteResponse { status } => self.handle_vote_response(status, ports),
            RaftMessage::Heartbeat { proposed_value } => {
                self.handle_heartbeat(from, proposed_value, ports)
            }
            RaftMessage::HeartbeatResponse { kind, status } => {
                self.handle_heartbeat_response(kind, status, ports)
            }
        }
    }

    fn start_election<P: Ports>(&mut self, ports: &mut P) {
        // Vote for self, no longer available to anyone else
        self.state.has_voted = true;
        self.state.role = NodeRole::Candidate;
        info!("node {} starting election", self.id);

        let request = RaftMessage::VoteRequest {
            candidate_id: self.id,
        };
        ports.broadcast(request.encode());

        // Keep soliciting until a heartbeat or leadership silences the timer
        self.arm_election_timer(ports);

        // A cluster of one is won by the candidate's own vote
        if is_majority(self.state.vote_success + 1, self.config.cluster_size) {
            self.become_leader(ports);
        }
    }

    fn handle_vote_request<P: Ports>(&mut self, from: NodeId, candidate_id: NodeId, ports: &mut P) {
        let status = if self.state.has_voted {
            VoteStatus::Denied
        } else {
            self.state.has_voted = true;
            VoteStatus::Granted
        };
        debug!(
            "node {} answers vote request of node {candidate_id}: {status:?}",
            self.id
        );

        ports.send_to(from, RaftMessage::VoteResponse { status }.encode());
    }

    fn handle_vote_response<P: Ports>(&mut self, status: VoteStatus, ports: &mut P) {
        if self.is_leader() {
            debug!("node {} is already leader, ignoring vote response", self.id);
            return;
        }
        if self.state.committed {
            debug!("node {} has committed, ignoring vote response", self.id);
            return;
        }

        if status.is_granted() {
            self.state.vote_success += 1;
        } else {
            self.state.vote_failed += 1;
        }

        let cluster_size = self.config.cluster_size;
        if is_majority(self.state.vote_success + 1, cluster_size) {
            self.state.reset_tally();
            self.become_leader(ports);
        } else if self.state.vote_failed >= cluster_size / 2 {
            self.state.reset_tally();
            // Rejected by half the cluster: free to vote for someone else
            self.state.has_voted = false;
            self.state.role = NodeRole::Follower;
            info!("node {} lost the election", self.id);
        }
    }

    fn become_leader<P: Ports>(&mut self, ports: &mut P) {
        self.state.reset_tally();
        if let Some(handle) = self.election_timer.take() {
            ports.cancel(handle);
        }
        self.state.role = NodeRole::Leader;
        info!("node {} became leader", self.id);

        // Inject the proposal into a later heartbeat
        self.proposal_timer =
            Some(ports.schedule(self.config.proposal_delay(), TimerEvent::ArmProposal));
        self.send_heartbeat(ports);
    }

    fn arm_proposal(&mut self) {
        self.state.proposal_armed = true;
        debug!("node {} will propose on its next heartbeat", self.id);
    }

    fn send_heartbeat<P: Ports>(&mut self, ports: &mut P) {
        if !self.is_leader() || self.state.proposal_sent {
            return;
        }
        self.state.has_voted = true;

        if self.state.proposal_armed {
            let value = self.id;
            ports.broadcast(RaftMessage::proposal(value).encode());
            self.state.value = value;
            self.state.proposal_sent = true;
            info!("node {} proposed value {value}", self.id);

            // Proposal goes out once; the heartbeat loop ends here
            if let Some(handle) = self.heartbeat_timer.take() {
                ports.cancel(handle);
            }
            if is_majority(1, self.config.cluster_size) {
                self.reach_consensus();
            }
        } else {
            ports.broadcast(RaftMessage::normal_heartbeat().encode());
            self.heartbeat_timer =
                Some(ports.schedule(self.config.heartbeat_interval(), TimerEvent::Heartbeat));
        }
    }

    fn handle_heartbeat<P: Ports>(
        &mut self,
        from: NodeId,
        proposed_value: Option<NodeId>,
        ports: &mut P,
    ) {
        if self.is_leader() {
            warn!("node {} is leader, ignoring heartbeat from node {from}", self.id);
            return;
        }

        let kind = match proposed_value {
            Some(_) => HeartbeatKind::Proposal,
            None => HeartbeatKind::Normal,
        };
        let response = RaftMessage::HeartbeatResponse {
            kind,
            status: VoteStatus::Granted,
        };
        ports.send_to(from, response.encode());

        if self.state.role == NodeRole::Candidate {
            self.state.role = NodeRole::Follower;
        }

        match proposed_value {
            Some(value) => {
                if !self.state.committed {
                    self.state.value = value;
                    self.state.committed = true;
                    info!("node {} changed the value to {value}", self.id);
                }
                // Out of the election protocol for good
                if let Some(handle) = self.election_timer.take() {
                    ports.cancel(handle);
                }
            }
            None => {
                if !self.state.committed {
                    self.arm_election_timer(ports);
                }
            }
        }
    }

    fn handle_heartbeat_response<P: Ports>(
        &mut self,
        kind: HeartbeatKind,
        status: VoteStatus,
        ports: &mut P,
    ) {
        if !self.is_leader() || self.state.consensus_reached {
            debug!("node {} ignoring heartbeat response", self.id);
            return;
        }

        if kind == HeartbeatKind::Proposal && status.is_granted() {
            self.state.vote_success += 1;
        } else {
            self.state.vote_failed += 1;
        }

        let cluster_size = self.config.cluster_size;
        if self.state.tally() == ack_window(cluster_size) {
            let accepted = is_majority(self.state.vote_success + 1, cluster_size);
            self.state.reset_tally();
            if accepted {
                if let Some(handle) = self.heartbeat_timer.take() {
                    ports.cancel(handle);
                }
                self.reach_consensus();
            }
        }
    }

    fn reach_consensus(&mut self) {
        self.state.consensus_reached = true;
        info!(
            "node {} finished consensus on value {}",
            self.id, self.state.value
        );
    }

    /// Replaces the election timer with a fresh random timeout.
    fn arm_election_timer<P: Ports>(&mut self, ports: &mut P) {
        if let Some(handle) = self.election_timer.take() {
            ports.cancel(handle);
        }
        let timeout = random_election_timeout(
            &mut self.rng,
            self.config.election_timeout_min,
            self.config.election_timeout_max,
        );
        self.election_timer = Some(ports.schedule(timeout, TimerEvent::Election));
    }
}
