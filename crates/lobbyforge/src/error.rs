//! Unified error type for Lobbyforge.

use lobbyforge_protocol::{PlatformErrorCode, ProtocolError};
use lobbyforge_session::SessionError;
use lobbyforge_transport::TransportError;
use lobbyforge_world::WorldError;

/// Every error a lobby operation can report.
///
/// The first group mirrors the error codes games already handle for
/// matchmaking. The wrappers at the bottom carry lower-layer errors that
/// have no better mapping.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("room not found")]
    RoomNotFound,

    #[error("room is full")]
    RoomFull,

    /// Peer signaling towards the room owner never came up.
    #[error("connection to the room owner failed")]
    ConnectionFailed,

    /// The session handle is stale, or the session went away while the
    /// operation was running.
    #[error("invalid session")]
    InvalidSession,

    /// A fixed-size table (sessions, members, connections) is exhausted.
    #[error("out of memory")]
    OutOfMemory,

    /// No world was usable for the operation.
    #[error("world not defined")]
    WorldNotDefined,

    #[error("session is not migratable")]
    SessionNotMigratable,

    /// A create or join completed after it was cancelled.
    #[error("illegal session join")]
    IllegalSessionJoin,

    #[error("internal error")]
    InternalError,

    #[error("too many tasks in flight")]
    TooManyTasks,

    /// The operation is not allowed in the session's current role or
    /// state, e.g. updating a session we do not host.
    #[error("invalid request")]
    InvalidRequest,

    #[error("invalid parameter")]
    InvalidParam,

    #[error("user data too large")]
    OutOfUserData,

    #[error("session user data layout exhausted")]
    OutOfSessionUserData,

    #[error("session user data item not registered")]
    UserDataNotRegistered,

    #[error("task cancelled")]
    Cancelled,

    /// The platform never answered a request or web job.
    #[error("platform request timed out")]
    TimedOut,

    /// The lobby service has shut down.
    #[error("lobby service unavailable")]
    ServiceUnavailable,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(SessionError),
}

impl From<SessionError> for LobbyError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidSession(_) => Self::InvalidSession,
            SessionError::OutOfSlots => Self::OutOfMemory,
            other => Self::Session(other),
        }
    }
}

impl From<WorldError> for LobbyError {
    fn from(_: WorldError) -> Self {
        Self::WorldNotDefined
    }
}

impl LobbyError {
    /// Local mapping of the platform codes a task can recover from.
    /// `None` for codes that must take the fatal path.
    pub(crate) fn from_platform(code: PlatformErrorCode) -> Option<Self> {
        match code {
            PlatformErrorCode::RoomNotFound => Some(Self::RoomNotFound),
            PlatformErrorCode::RoomFull => Some(Self::RoomFull),
            PlatformErrorCode::Code(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use lobbyforge_protocol::{MemberId, RoomId};

    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err: LobbyError = TransportError::TableFull.into();
        assert!(matches!(err, LobbyError::Transport(_)));
        assert_eq!(err.to_string(), "connection table full");
    }

    #[test]
    fn test_from_protocol_error() {
        let err: LobbyError = ProtocolError::InvalidSessionId("zero".into()).into();
        assert!(matches!(err, LobbyError::Protocol(_)));
        assert!(err.to_string().contains("zero"));
    }

    #[test]
    fn test_from_session_error_out_of_slots_is_out_of_memory() {
        let err: LobbyError = SessionError::OutOfSlots.into();
        assert!(matches!(err, LobbyError::OutOfMemory));
    }

    #[test]
    fn test_from_session_error_other_wrapped() {
        let err: LobbyError = SessionError::MemberTableFull { room: RoomId(3) }.into();
        assert!(matches!(err, LobbyError::Session(_)));

        let err: LobbyError = SessionError::DuplicateMember {
            room: RoomId(3),
            member: MemberId(1),
        }
        .into();
        assert!(err.to_string().contains("already present"));
    }

    #[test]
    fn test_from_world_error_is_world_not_defined() {
        let err: LobbyError = WorldError::NoEligibleWorld.into();
        assert!(matches!(err, LobbyError::WorldNotDefined));
    }

    #[test]
    fn test_from_platform_only_maps_room_codes() {
        assert!(matches!(
            LobbyError::from_platform(PlatformErrorCode::RoomFull),
            Some(LobbyError::RoomFull)
        ));
        assert!(LobbyError::from_platform(PlatformErrorCode::Code(-1)).is_none());
    }
}
