//! Per-member peer signaling state.
//!
//! ```text
//!            add other member           Connected event
//! [None] ─────────────────────→ [Pending] ───────────────→ [Active]
//!  (me)                             │                          │
//!                                   │ timeout                  │ owner ack timeout
//!                                   ▼                          ▼
//!                                [Dead] ←──────────────────────┘
//! ```
//!
//! Transitions only escalate. A member that went `Dead` stays dead even if
//! a late Connected event shows up.

use tokio::time::Instant;

/// Signaling state of one room member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    /// The local member. There is nothing to signal.
    None,
    Pending { since: Instant },
    Active { since: Instant },
    Dead,
}

impl SignalingState {
    pub fn status(&self) -> SignalingStatus {
        match self {
            Self::None => SignalingStatus::None,
            Self::Pending { .. } => SignalingStatus::Pending,
            Self::Active { .. } => SignalingStatus::Active,
            Self::Dead => SignalingStatus::Dead,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// `Pending → Active`. Returns `false` (and changes nothing) from any
    /// other state.
    pub fn activate(&mut self, now: Instant) -> bool {
        match self {
            Self::Pending { .. } => {
                *self = Self::Active { since: now };
                true
            }
            _ => false,
        }
    }

    /// `Pending | Active → Dead`. Returns `false` if already dead or if
    /// this is the local member.
    pub fn kill(&mut self) -> bool {
        match self {
            Self::Pending { .. } | Self::Active { .. } => {
                *self = Self::Dead;
                true
            }
            Self::None | Self::Dead => false,
        }
    }
}

/// Signaling state without timestamps, as reported by
/// [`Session::check_signaling`](crate::Session::check_signaling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingStatus {
    None,
    Pending,
    Active,
    Dead,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activate_from_pending_only() {
        let now = Instant::now();
        let mut state = SignalingState::Pending { since: now };
        assert!(state.activate(now));
        assert!(state.is_active());
        assert!(!state.activate(now));
    }

    #[test]
    fn test_dead_never_becomes_active() {
        let now = Instant::now();
        let mut state = SignalingState::Pending { since: now };
        assert!(state.kill());
        assert!(!state.activate(now));
        assert_eq!(state.status(), SignalingStatus::Dead);
    }

    #[test]
    fn test_kill_local_member_is_noop() {
        let mut state = SignalingState::None;
        assert!(!state.kill());
        assert_eq!(state, SignalingState::None);
    }
}
