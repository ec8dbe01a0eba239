//! Common test utilities and helpers

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use raftlet::raft::{
    NodeId, RaftConfig, RaftNode, TimerEvent, TimerHandle, TimerPort, TransportPort,
};

/// Staggered configurations: node `fast` always times out at 150 ms, every
/// other node somewhere in `[250, 300)` ms, so the first candidacy wins
/// before anyone else can start one.
pub fn staggered_configs(cluster_size: usize, fast: NodeId, proposal_delay_ms: u64) -> Vec<RaftConfig> {
    (0..cluster_size)
        .map(|id| {
            let id = id as NodeId;
            let cfg = RaftConfig::for_cluster(id, cluster_size).with_proposal_delay(proposal_delay_ms);
            if id == fast {
                cfg.with_election_timeout(150, 151)
            } else {
                cfg.with_election_timeout(250, 300)
            }
        })
        .collect()
}

/// Ports that only record: timers never fire and messages stay queued until
/// a test moves them.
#[derive(Default)]
pub struct ManualPorts {
    peers: Vec<NodeId>,
    next_timer: u64,
    pub timers: HashMap<TimerHandle, (Duration, TimerEvent)>,
    pub outbox: VecDeque<(NodeId, Vec<u8>)>,
}

impl TimerPort for ManualPorts {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.next_timer += 1;
        let handle = TimerHandle::new(self.next_timer);
        self.timers.insert(handle, (delay, event));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.timers.remove(&handle);
    }
}

impl TransportPort for ManualPorts {
    fn send_to(&mut self, peer: NodeId, payload: Vec<u8>) {
        self.outbox.push_back((peer, payload));
    }

    fn broadcast(&mut self, payload: Vec<u8>) {
        for peer in self.peers.clone() {
            self.send_to(peer, payload.clone());
        }
    }
}

/// A cluster whose every timer fire and delivery is chosen by the test.
pub struct ManualCluster {
    pub nodes: Vec<RaftNode>,
    pub ports: Vec<ManualPorts>,
}

impl ManualCluster {
    pub fn new(cluster_size: usize) -> Self {
        let mut nodes = Vec::new();
        let mut ports = Vec::new();
        for id in 0..cluster_size {
            let cfg = RaftConfig::for_cluster(id as NodeId, cluster_size);
            ports.push(ManualPorts {
                peers: cfg.peers.clone(),
                ..ManualPorts::default()
            });
            nodes.push(RaftNode::with_seed(cfg, id as u64).expect("valid config"));
        }

        let mut cluster = Self { nodes, ports };
        for id in 0..cluster_size {
            cluster.nodes[id].start(&mut cluster.ports[id]);
        }
        cluster
    }

    pub fn node(&self, id: NodeId) -> &RaftNode {
        &self.nodes[id as usize]
    }

    /// Fires the pending timer of kind `event` on node `id`.
    pub fn fire(&mut self, id: NodeId, event: TimerEvent) {
        let index = id as usize;
        let handle = self.ports[index]
            .timers
            .iter()
            .find(|(_, (_, e))| *e == event)
            .map(|(h, _)| *h)
            .unwrap_or_else(|| panic!("node {id} has no pending {event:?} timer"));
        self.ports[index].timers.remove(&handle);
        self.nodes[index].on_timer(handle, event, &mut self.ports[index]);
    }

    pub fn has_timer(&self, id: NodeId, event: TimerEvent) -> bool {
        self.ports[id as usize]
            .timers
            .values()
            .any(|(_, e)| *e == event)
    }

    /// Delivers the oldest queued message from `from` to `to`.
    pub fn deliver(&mut self, from: NodeId, to: NodeId) {
        let outbox = &mut self.ports[from as usize].outbox;
        let position = outbox
            .iter()
            .position(|(peer, _)| *peer == to)
            .unwrap_or_else(|| panic!("no message queued from {from} to {to}"));
        let (_, payload) = outbox.remove(position).expect("position is valid");

        let index = to as usize;
        self.nodes[index].on_message(from, &payload, &mut self.ports[index]);
    }

    /// Delivers queued messages round-robin until every outbox is empty.
    pub fn deliver_all(&mut self) {
        loop {
            let mut delivered = false;
            for from in 0..self.nodes.len() {
                if let Some((to, payload)) = self.ports[from].outbox.pop_front() {
                    let index = to as usize;
                    self.nodes[index].on_message(from as NodeId, &payload, &mut self.ports[index]);
                    delivered = true;
                }
            }
            if !delivered {
                break;
            }
        }
    }
}
