use super::{NodeId, TimerPort};

/// Delivery primitive supplied by the node's environment.
///
/// Each send may be delayed independently; ordering between two sends to the
/// same peer is not guaranteed.
pub trait TransportPort {
    fn send_to(&mut self, peer: NodeId, payload: Vec<u8>);

    /// Sends `payload` to every configured peer.
    fn broadcast(&mut self, payload: Vec<u8>);
}

/// Everything a node handler needs from its environment.
pub trait Ports: TimerPort + TransportPort {}

impl<T: TimerPort + TransportPort> Ports for T {}
