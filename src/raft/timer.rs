use std::fmt;
use std::time::Duration;

use rand::Rng;

/// Opaque handle for a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// What a timer fire means to the node that armed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    Election,
    Heartbeat,
    ArmProposal,
}

/// Scheduling primitive supplied by the node's environment.
///
/// Timers are one-shot. A handler that wants a recurring timer re-arms it
/// itself each time it fires.
pub trait TimerPort {
    /// Fires `event` once on the node's own thread after `delay`.
    fn schedule(&mut self, delay: Duration, event: TimerEvent) -> TimerHandle;

    /// Prevents a pending fire. Must be a no-op for handles that already
    /// fired or were cancelled before.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Draws an election timeout uniformly from `[min_ms, max_ms)`.
pub fn random_election_timeout<R: Rng + ?Sized>(rng: &mut R, min_ms: u64, max_ms: u64) -> Duration {
    let timeout_ms = rng.random_range(min_ms..max_ms);
    Duration::from_millis(timeout_ms)
}
