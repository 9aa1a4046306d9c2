//! Server lifecycle states.
//!
//! ```text
//! Created ──start──▶ Started ──shutdown──▶ ShuttingDownGraceful ──▶ Stopped
//!    │                                            │                    ▲
//!    └──start failed──▶ Stopped                   ▼                    │
//!                                        ShuttingDownForced ───────────┘
//! ```
//!
//! No state ever returns to `Started`.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Phase of the server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, never started
    Created = 0,
    /// Listening and accepting calls
    Started = 1,
    /// No longer accepting; waiting for in-flight calls to drain
    ShuttingDownGraceful = 2,
    /// Grace period elapsed; in-flight calls are being terminated
    ShuttingDownForced = 3,
    /// Fully stopped
    Stopped = 4,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::ShuttingDownGraceful,
            3 => Self::ShuttingDownForced,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Started => write!(f, "Started"),
            Self::ShuttingDownGraceful => write!(f, "ShuttingDownGraceful"),
            Self::ShuttingDownForced => write!(f, "ShuttingDownForced"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Lock-free cell holding the current [`LifecycleState`].
#[derive(Debug)]
pub struct AtomicLifecycle(AtomicU8);

impl AtomicLifecycle {
    pub fn new() -> Self {
        Self(AtomicU8::new(LifecycleState::Created as u8))
    }

    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: LifecycleState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move `from -> to`; returns false (and changes nothing) if the current
    /// state is not `from`.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// How a `shutdown` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Server was not running; nothing to do
    NotRunning,
    /// All in-flight calls drained within the grace period
    Graceful,
    /// Grace period elapsed and in-flight calls were terminated
    Forced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_created() {
        assert_eq!(AtomicLifecycle::new().get(), LifecycleState::Created);
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let state = AtomicLifecycle::new();
        assert!(state.transition(LifecycleState::Created, LifecycleState::Started));
        assert!(!state.transition(LifecycleState::Created, LifecycleState::Started));
        assert_eq!(state.get(), LifecycleState::Started);
    }

    #[test]
    fn test_round_trips_through_atomic() {
        let state = AtomicLifecycle::new();
        for s in [
            LifecycleState::Started,
            LifecycleState::ShuttingDownGraceful,
            LifecycleState::ShuttingDownForced,
            LifecycleState::Stopped,
        ] {
            state.set(s);
            assert_eq!(state.get(), s);
        }
    }
}
