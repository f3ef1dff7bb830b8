//! Error types for the session layer.

use lobbyforge_protocol::{MemberId, RoomId};

use crate::SessionHandle;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Every session slot is in use.
    #[error("no free session slot")]
    OutOfSlots,

    /// The handle refers to a session that has been freed (or never
    /// existed). Stale handles are rejected here instead of resolving to
    /// whatever reused the slot.
    #[error("invalid session handle {0}")]
    InvalidSession(SessionHandle),

    /// A room event tried to add a member id that is already present.
    #[error("member {member} already present in room {room}")]
    DuplicateMember { room: RoomId, member: MemberId },

    #[error("member {member} not found in room {room}")]
    MemberNotFound { room: RoomId, member: MemberId },

    #[error("member table of room {room} is full")]
    MemberTableFull { room: RoomId },
}
