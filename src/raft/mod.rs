mod config;
mod error;
pub mod message;
mod node;
mod state;
mod timer;
mod transport;

pub use self::config::{RaftConfig, MAX_NODE_ID};
pub use self::error::RaftError;
pub use self::message::{FrameBuffer, HeartbeatKind, RaftMessage, VoteStatus};
pub use self::node::{ack_window, is_majority, RaftNode};
pub use self::state::{NodeRole, NodeState};
pub use self::timer::{random_election_timeout, TimerEvent, TimerHandle, TimerPort};
pub use self::transport::{Ports, TransportPort};

/// Identifier of a cluster member; also the value it proposes once leader.
pub type NodeId = u8;
