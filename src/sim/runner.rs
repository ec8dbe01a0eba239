//! Deterministic discrete-event simulation of a cluster.
//!
//! All nodes share one virtual clock and one event queue ordered by
//! `(time, sequence)`. Given the same seed a run is identical every time.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use log::{debug, info, trace, warn};

use super::network::{NetworkConfig, SimulatedNetwork};
use crate::raft::{
    NodeId, NodeRole, NodeState, RaftConfig, RaftError, RaftNode, TimerEvent, TimerHandle,
    TimerPort, TransportPort,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EventKey {
    time: Duration,
    sequence: u64,
}

#[derive(Debug)]
enum SimEvent {
    Timer {
        node: NodeId,
        handle: TimerHandle,
        event: TimerEvent,
    },
    Deliver {
        from: NodeId,
        to: NodeId,
        payload: Vec<u8>,
    },
}

/// Counters collected during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    pub events_processed: u64,
    pub timers_scheduled: u64,
    pub timers_cancelled: u64,
    pub messages_sent: u64,
    pub fragments_delivered: u64,
    pub messages_undeliverable: u64,
}

/// Snapshot of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationReport {
    pub elapsed: Duration,
    pub nodes: Vec<(NodeId, NodeState)>,
    /// Every leadership change, in order.
    pub elections: Vec<(Duration, NodeId)>,
    /// When the leader observed a majority acknowledging its proposal.
    pub consensus_at: Option<Duration>,
    pub stats: SimulationStats,
}

impl SimulationReport {
    pub fn leaders(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, state)| state.role == NodeRole::Leader)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Value of every node, indexed by node id.
    pub fn values(&self) -> Vec<u8> {
        self.nodes.iter().map(|(_, state)| state.value).collect()
    }
}

/// Event queue plus everything the ports of a node need to touch.
struct EventQueue {
    events: BTreeMap<EventKey, SimEvent>,
    sequence: u64,
    now: Duration,
    next_timer: u64,
    /// Pending timers, for cancellation.
    timers: HashMap<TimerHandle, EventKey>,
    network: SimulatedNetwork,
    rng: StdRng,
    stats: SimulationStats,
}

impl EventQueue {
    fn push(&mut self, time: Duration, event: SimEvent) -> EventKey {
        self.sequence += 1;
        let key = EventKey {
            time,
            sequence: self.sequence,
        };
        self.events.insert(key, event);
        key
    }

    fn schedule_timer(&mut self, node: NodeId, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.next_timer += 1;
        let handle = TimerHandle::new(self.next_timer);
        let key = self.push(self.now + delay, SimEvent::Timer { node, handle, event });
        self.timers.insert(handle, key);
        self.stats.timers_scheduled += 1;
        handle
    }

    fn cancel_timer(&mut self, handle: TimerHandle) {
        // Already fired or already cancelled: nothing to do
        if let Some(key) = self.timers.remove(&handle) {
            self.events.remove(&key);
            self.stats.timers_cancelled += 1;
        }
    }

    fn send(&mut self, from: NodeId, to: NodeId, payload: Vec<u8>) {
        let delivery_time = self.now + self.network.sample_delay(&mut self.rng);
        // Fragments share a delivery time and consecutive sequence numbers,
        // so nothing can slip between them.
        for chunk in self.network.fragment(payload, &mut self.rng) {
            self.push(
                delivery_time,
                SimEvent::Deliver {
                    from,
                    to,
                    payload: chunk,
                },
            );
        }
        self.stats.messages_sent += 1;
    }
}

/// Ports handed to a node while it handles one event.
struct NodePorts<'a> {
    node: NodeId,
    peers: &'a [NodeId],
    queue: &'a mut EventQueue,
}

impl TimerPort for NodePorts<'_> {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.queue.schedule_timer(self.node, delay, event)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.queue.cancel_timer(handle);
    }
}

impl TransportPort for NodePorts<'_> {
    fn send_to(&mut self, peer: NodeId, payload: Vec<u8>) {
        self.queue.send(self.node, peer, payload);
    }

    fn broadcast(&mut self, payload: Vec<u8>) {
        for &peer in self.peers {
            self.queue.send(self.node, peer, payload.clone());
        }
    }
}

pub struct Simulation {
    /// All nodes, indexed by node id.
    nodes: Vec<RaftNode>,
    peers: Vec<Vec<NodeId>>,
    queue: EventQueue,
    elections: Vec<(Duration, NodeId)>,
    consensus_at: Option<Duration>,
}

impl Simulation {
    /// Builds a simulation from one configuration per node. Node `i` must
    /// carry id `i`.
    pub fn new(
        configs: Vec<RaftConfig>,
        network: NetworkConfig,
        seed: u64,
    ) -> Result<Self, RaftError> {
        if configs.is_empty() {
            return Err(RaftError::InvalidConfig(
                "simulation needs at least one node".to_string(),
            ));
        }

        let mut nodes = Vec::with_capacity(configs.len());
        let mut peers = Vec::with_capacity(configs.len());
        for (index, config) in configs.into_iter().enumerate() {
            if config.node_id as usize != index {
                return Err(RaftError::InvalidConfig(format!(
                    "node at position {index} has id {}",
                    config.node_id
                )));
            }
            peers.push(config.peers.clone());
            nodes.push(RaftNode::with_seed(config, node_seed(seed, index))?);
        }

        Ok(Self {
            nodes,
            peers,
            queue: EventQueue {
                events: BTreeMap::new(),
                sequence: 0,
                now: Duration::ZERO,
                next_timer: 0,
                timers: HashMap::new(),
                network: SimulatedNetwork::new(network),
                rng: StdRng::seed_from_u64(seed),
                stats: SimulationStats::default(),
            },
            elections: Vec::new(),
            consensus_at: None,
        })
    }

    /// Convenience constructor for nodes `0..cluster_size` with default timings.
    pub fn with_cluster_size(
        cluster_size: usize,
        network: NetworkConfig,
        seed: u64,
    ) -> Result<Self, RaftError> {
        let configs = (0..cluster_size)
            .map(|id| RaftConfig::for_cluster(id as NodeId, cluster_size))
            .collect();
        Self::new(configs, network, seed)
    }

    /// Starts every node, arming its first election timer.
    pub fn start(&mut self) {
        for index in 0..self.nodes.len() {
            let node = &mut self.nodes[index];
            let mut ports = NodePorts {
                node: node.id(),
                peers: &self.peers[index],
                queue: &mut self.queue,
            };
            node.start(&mut ports);
        }
    }

    pub fn now(&self) -> Duration {
        self.queue.now
    }

    pub fn node(&self, id: NodeId) -> Option<&RaftNode> {
        self.nodes.get(id as usize)
    }

    pub fn nodes(&self) -> &[RaftNode] {
        &self.nodes
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.queue.stats
    }

    pub fn pending_events(&self) -> usize {
        self.queue.events.len()
    }

    /// Injects raw bytes as if `from` had sent them to `to`, delivered at the
    /// current time after anything already due.
    pub fn inject(&mut self, from: NodeId, to: NodeId, payload: Vec<u8>) {
        let now = self.queue.now;
        self.queue.push(now, SimEvent::Deliver { from, to, payload });
    }

    /// Processes the next event. Returns `false` once the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some((key, event)) = self.queue.events.pop_first() else {
            return false;
        };
        self.queue.now = key.time;
        self.queue.stats.events_processed += 1;
        trace!("[{:?}] processing {event:?}", key.time);

        match event {
            SimEvent::Timer {
                node,
                handle,
                event,
            } => {
                // Fired timers are inert from now on
                self.queue.timers.remove(&handle);
                self.dispatch(node, |node, ports| node.on_timer(handle, event, ports));
            }
            SimEvent::Deliver { from, to, payload } => {
                if self.nodes.get(to as usize).is_none() {
                    warn!("dropping message from node {from} to unknown node {to}");
                    self.queue.stats.messages_undeliverable += 1;
                    return true;
                }
                self.queue.stats.fragments_delivered += 1;
                self.dispatch(to, |node, ports| node.on_message(from, &payload, ports));
            }
        }

        true
    }

    /// Runs until no more events are due at or before `end_time`, then moves
    /// the clock to `end_time`.
    pub fn run_until(&mut self, end_time: Duration) {
        while let Some((key, _)) = self.queue.events.first_key_value() {
            if key.time > end_time {
                debug!(
                    "time limit reached with {} pending events",
                    self.queue.events.len()
                );
                break;
            }
            self.step();
        }
        if self.queue.now < end_time {
            self.queue.now = end_time;
        }
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            elapsed: self.queue.now,
            nodes: self
                .nodes
                .iter()
                .map(|node| (node.id(), node.state().clone()))
                .collect(),
            elections: self.elections.clone(),
            consensus_at: self.consensus_at,
            stats: self.queue.stats.clone(),
        }
    }

    fn dispatch<F>(&mut self, id: NodeId, handler: F)
    where
        F: FnOnce(&mut RaftNode, &mut NodePorts<'_>),
    {
        let index = id as usize;
        let node = &mut self.nodes[index];
        let was_leader = node.is_leader();
        let had_consensus = node.state().consensus_reached;

        let mut ports = NodePorts {
            node: id,
            peers: &self.peers[index],
            queue: &mut self.queue,
        };
        handler(node, &mut ports);

        let now = self.queue.now;
        if !was_leader && node.is_leader() {
            info!("[{now:?}] node {id} became leader");
            self.elections.push((now, id));
        }
        if !had_consensus && node.state().consensus_reached && self.consensus_at.is_none() {
            info!("[{now:?}] leader {id} reached consensus");
            self.consensus_at = Some(now);
        }
    }
}

fn node_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_add(index as u64 + 1)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> EventQueue {
        EventQueue {
            events: BTreeMap::new(),
            sequence: 0,
            now: Duration::ZERO,
            next_timer: 0,
            timers: HashMap::new(),
            network: SimulatedNetwork::new(NetworkConfig::default()),
            rng: StdRng::seed_from_u64(1),
            stats: SimulationStats::default(),
        }
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut queue = queue();
        let handle = queue.schedule_timer(0, Duration::from_millis(5), TimerEvent::Election);
        assert_eq!(queue.events.len(), 1);

        queue.cancel_timer(handle);
        queue.cancel_timer(handle);

        assert!(queue.events.is_empty());
        assert_eq!(queue.stats.timers_cancelled, 1);
    }

    #[test]
    fn cancel_after_fire_is_a_no_op() {
        let mut sim = Simulation::with_cluster_size(1, NetworkConfig::default(), 9).unwrap();
        sim.start();
        let handle = sim.node(0).unwrap().election_timer().unwrap();

        // Fires the election timer; a one-node cluster elects itself.
        assert!(sim.step());
        assert!(sim.node(0).unwrap().is_leader());

        let before = sim.node(0).unwrap().state().clone();
        let pending = sim.pending_events();
        sim.queue.cancel_timer(handle);
        sim.queue.cancel_timer(handle);

        assert_eq!(sim.node(0).unwrap().state(), &before);
        assert_eq!(sim.pending_events(), pending);
    }

    #[test]
    fn events_run_in_time_then_sequence_order() {
        let mut queue = queue();
        let late = queue.schedule_timer(0, Duration::from_millis(10), TimerEvent::Heartbeat);
        let early = queue.schedule_timer(1, Duration::from_millis(1), TimerEvent::Election);
        let tie = queue.schedule_timer(2, Duration::from_millis(1), TimerEvent::Election);

        let order: Vec<TimerHandle> = std::iter::from_fn(|| queue.events.pop_first())
            .map(|(_, event)| match event {
                SimEvent::Timer { handle, .. } => handle,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();

        assert_eq!(order, vec![early, tie, late]);
    }

    #[test]
    fn rejects_misnumbered_nodes() {
        let configs = vec![RaftConfig::for_cluster(1, 2), RaftConfig::for_cluster(0, 2)];
        assert!(matches!(
            Simulation::new(configs, NetworkConfig::default(), 1),
            Err(RaftError::InvalidConfig(_))
        ));
    }

    #[test]
    fn messages_to_unknown_nodes_are_counted() {
        let mut sim = Simulation::with_cluster_size(2, NetworkConfig::default(), 4).unwrap();
        sim.inject(0, 7, b"20".to_vec());
        assert!(sim.step());
        assert_eq!(sim.stats().messages_undeliverable, 1);
    }
}
