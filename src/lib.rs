// Protocol core
pub mod raft;

// Collaborators driving the core
pub mod sim;
pub mod runtime;

// Configuration
pub mod config;

// Public exports
pub use config::ClusterConfig;
pub use raft::{NodeId, NodeRole, NodeState, RaftConfig, RaftError, RaftNode};
pub use runtime::{LiveCluster, LiveConfig};
pub use sim::{NetworkConfig, Simulation, SimulationReport};
