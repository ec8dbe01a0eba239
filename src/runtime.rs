//! Real-time cluster on tokio.
//!
//! Every node runs in its own task that exclusively owns its `RaftNode` and
//! consumes one input at a time from an `mpsc` inbox. Timers and delayed
//! deliveries are spawned sleeps that post back into the right inbox.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::sleep;
use log::{debug, error, info, warn};

use crate::raft::{
    NodeId, NodeState, RaftConfig, RaftError, RaftNode, TimerEvent, TimerHandle, TimerPort,
    TransportPort,
};

const INBOX_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Delivery delay is drawn uniformly from `[0, max_delivery_delay_ms)`.
    pub max_delivery_delay_ms: u64,
    /// Seeds node and network randomness; `None` uses OS entropy.
    pub seed: Option<u64>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            max_delivery_delay_ms: 5,
            seed: None,
        }
    }
}

enum NodeInput {
    Deliver { from: NodeId, payload: Vec<u8> },
    TimerFired { handle: TimerHandle, event: TimerEvent },
    Snapshot(oneshot::Sender<NodeState>),
    Shutdown,
}

/// The ports of one live node.
struct LiveEnv {
    me: NodeId,
    peers: Vec<NodeId>,
    inbox: mpsc::Sender<NodeInput>,
    directory: Arc<HashMap<NodeId, mpsc::Sender<NodeInput>>>,
    timers: HashMap<TimerHandle, AbortHandle>,
    next_timer: u64,
    rng: StdRng,
    max_delivery_delay_ms: u64,
}

impl TimerPort for LiveEnv {
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle {
        self.next_timer += 1;
        let handle = TimerHandle::new(self.next_timer);

        let inbox = self.inbox.clone();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            if inbox
                .send(NodeInput::TimerFired { handle, event })
                .await
                .is_err()
            {
                debug!("timer {handle} fired after its node stopped");
            }
        });
        self.timers.insert(handle, task.abort_handle());
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(task) = self.timers.remove(&handle) {
            task.abort();
        }
    }
}

impl TransportPort for LiveEnv {
    fn send_to(&mut self, peer: NodeId, payload: Vec<u8>) {
        let Some(target) = self.directory.get(&peer).cloned() else {
            warn!("node {}: no route to node {peer}", self.me);
            return;
        };

        let delay = if self.max_delivery_delay_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.rng.random_range(0..self.max_delivery_delay_ms))
        };
        let from = self.me;
        tokio::spawn(async move {
            sleep(delay).await;
            if target
                .send(NodeInput::Deliver { from, payload })
                .await
                .is_err()
            {
                debug!("node {peer} stopped before delivery from node {from}");
            }
        });
    }

    fn broadcast(&mut self, payload: Vec<u8>) {
        for peer in self.peers.clone() {
            self.send_to(peer, payload.clone());
        }
    }
}

struct NodeTask {
    node: RaftNode,
    env: LiveEnv,
}

impl NodeTask {
    async fn run(mut self, mut inbox: mpsc::Receiver<NodeInput>) {
        self.node.start(&mut self.env);

        while let Some(input) = inbox.recv().await {
            match input {
                NodeInput::Deliver { from, payload } => {
                    self.node.on_message(from, &payload, &mut self.env)
                }
                NodeInput::TimerFired { handle, event } => {
                    // A cancel can race with a fire already queued
                    if self.env.timers.remove(&handle).is_some() {
                        self.node.on_timer(handle, event, &mut self.env);
                    } else {
                        debug!("node {}: dropping cancelled timer {handle}", self.env.me);
                    }
                }
                NodeInput::Snapshot(reply) => {
                    let _ = reply.send(self.node.state().clone());
                }
                NodeInput::Shutdown => break,
            }
        }

        for (_, task) in self.env.timers.drain() {
            task.abort();
        }
        info!("node {} stopped", self.env.me);
    }
}

/// A running in-process cluster.
pub struct LiveCluster {
    inboxes: HashMap<NodeId, mpsc::Sender<NodeInput>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveCluster {
    /// Spawns one task per node. Must be called from within a tokio runtime.
    pub fn spawn(configs: Vec<RaftConfig>, config: LiveConfig) -> Result<Self, RaftError> {
        if configs.is_empty() {
            return Err(RaftError::InvalidConfig(
                "cluster needs at least one node".to_string(),
            ));
        }

        let mut inboxes = HashMap::new();
        let mut receivers = Vec::new();
        for cfg in &configs {
            let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
            if inboxes.insert(cfg.node_id, tx).is_some() {
                return Err(RaftError::InvalidConfig(format!(
                    "node {} configured twice",
                    cfg.node_id
                )));
            }
            receivers.push(rx);
        }
        let directory = Arc::new(inboxes.clone());

        let mut tasks = Vec::with_capacity(configs.len());
        for (cfg, rx) in configs.into_iter().zip(receivers) {
            let me = cfg.node_id;
            let (node, rng) = match config.seed {
                Some(seed) => {
                    let seed = seed.wrapping_add(u64::from(me));
                    (RaftNode::with_seed(cfg.clone(), seed)?, StdRng::seed_from_u64(!seed))
                }
                None => (RaftNode::new(cfg.clone())?, StdRng::from_os_rng()),
            };

            let env = LiveEnv {
                me,
                peers: cfg.peers.clone(),
                inbox: directory[&me].clone(),
                directory: Arc::clone(&directory),
                timers: HashMap::new(),
                next_timer: 0,
                rng,
                max_delivery_delay_ms: config.max_delivery_delay_ms,
            };

            tasks.push(tokio::spawn(NodeTask { node, env }.run(rx)));
        }

        info!("spawned live cluster of {} nodes", tasks.len());
        Ok(Self { inboxes, tasks })
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.inboxes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn snapshot(&self, id: NodeId) -> Result<NodeState, RaftError> {
        let inbox = self.inboxes.get(&id).ok_or(RaftError::UnknownNode(id))?;
        let (tx, rx) = oneshot::channel();
        inbox
            .send(NodeInput::Snapshot(tx))
            .await
            .map_err(|_| RaftError::ChannelClosed)?;
        rx.await.map_err(|_| RaftError::ChannelClosed)
    }

    /// State of every node, ordered by node id.
    pub async fn snapshots(&self) -> Result<Vec<(NodeId, NodeState)>, RaftError> {
        let mut states = Vec::new();
        for id in self.node_ids() {
            states.push((id, self.snapshot(id).await?));
        }
        Ok(states)
    }

    /// Stops every node and waits for its task to finish.
    pub async fn shutdown(mut self) {
        for (id, inbox) in &self.inboxes {
            if inbox.send(NodeInput::Shutdown).await.is_err() {
                debug!("node {id} already stopped");
            }
        }
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!("node task failed: {e}");
            }
        }
    }
}

impl Drop for LiveCluster {
    // Node tasks hold senders to their own inbox and would otherwise outlive
    // a cluster dropped without `shutdown`.
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
