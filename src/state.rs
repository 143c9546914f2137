//! The four-state server/host/session-manager lifecycle shared by
//! [`crate::server::ServerController`], [`crate::service_host::ServiceHost`],
//! and [`crate::session_manager::SessionManager`].
//!
//! Every owner of a `ServerState` moves strictly forward through
//! `Ready -> Start -> ShuttingDown -> Stop`; there are no transition loops.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state, strictly monotonic in the order declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Ready,
    Start,
    ShuttingDown,
    Stop,
}

impl ServerState {
    fn rank(self) -> u8 {
        match self {
            ServerState::Ready => 0,
            ServerState::Start => 1,
            ServerState::ShuttingDown => 2,
            ServerState::Stop => 3,
        }
    }

    /// `true` iff moving from `self` to `next` respects the strict
    /// `Ready -> Start -> ShuttingDown -> Stop` order (no loops, no skips
    /// backward, and no re-entering the current state).
    pub fn can_advance_to(self, next: ServerState) -> bool {
        next.rank() == self.rank() + 1
    }
}

/// An atomic cell holding a [`ServerState`], used so readers (broadcast,
/// sweep) never need to take the session map lock just to check phase.
#[derive(Debug)]
pub struct AtomicServerState(AtomicU8);

impl AtomicServerState {
    pub fn new(initial: ServerState) -> Self {
        Self(AtomicU8::new(initial.rank()))
    }

    pub fn load(&self) -> ServerState {
        match self.0.load(Ordering::Acquire) {
            0 => ServerState::Ready,
            1 => ServerState::Start,
            2 => ServerState::ShuttingDown,
            _ => ServerState::Stop,
        }
    }

    pub fn store(&self, state: ServerState) {
        self.0.store(state.rank(), Ordering::Release);
    }

    /// Advance to `next`, returning `false` (no-op) if the transition would
    /// violate monotonicity.
    pub fn advance(&self, next: ServerState) -> bool {
        let current = self.load();
        if current.can_advance_to(next) {
            self.store(next);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_forward_order() {
        assert!(ServerState::Ready.can_advance_to(ServerState::Start));
        assert!(ServerState::Start.can_advance_to(ServerState::ShuttingDown));
        assert!(ServerState::ShuttingDown.can_advance_to(ServerState::Stop));
    }

    #[test]
    fn no_skips_no_loops_no_backward() {
        assert!(!ServerState::Ready.can_advance_to(ServerState::ShuttingDown));
        assert!(!ServerState::Ready.can_advance_to(ServerState::Ready));
        assert!(!ServerState::Start.can_advance_to(ServerState::Ready));
        assert!(!ServerState::Stop.can_advance_to(ServerState::Start));
    }

    #[test]
    fn atomic_advance_rejects_invalid_transition() {
        let s = AtomicServerState::new(ServerState::Ready);
        assert!(!s.advance(ServerState::Stop));
        assert_eq!(s.load(), ServerState::Ready);
        assert!(s.advance(ServerState::Start));
        assert_eq!(s.load(), ServerState::Start);
    }
}
