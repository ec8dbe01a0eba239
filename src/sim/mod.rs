//! Discrete-event cluster simulator.
//!
//! Implements both node ports on top of a single virtual clock: timers and
//! message deliveries become queued events, processed one at a time.

mod network;
mod runner;

pub use network::{NetworkConfig, SimulatedNetwork};
pub use runner::{Simulation, SimulationReport, SimulationStats};
