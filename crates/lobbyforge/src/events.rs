//! Notifications pushed to the application.

use std::net::SocketAddr;

use lobbyforge_protocol::{ForcedReason, MemberId, OnlineId};
use lobbyforge_session::{RoomMember, SessionHandle};

/// One user of a session, as reported to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub member: MemberId,
    pub online_id: OnlineId,
    /// Peer address. `None` for the local user.
    pub addr: Option<SocketAddr>,
    pub is_local: bool,
    pub is_owner: bool,
    pub user_data: Vec<u8>,
}

impl From<&RoomMember> for SessionUser {
    fn from(member: &RoomMember) -> Self {
        Self {
            member: member.id,
            online_id: member.online_id.clone(),
            addr: member.addr,
            is_local: member.is_me(),
            is_owner: member.owner,
            user_data: member.user_data.clone(),
        }
    }
}

/// Something happened to a session outside any task the application
/// started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    UserJoined {
        session: SessionHandle,
        user: SessionUser,
    },
    UserLeft {
        session: SessionHandle,
        member: MemberId,
        online_id: OnlineId,
    },
    UserUpdated {
        session: SessionHandle,
        user: SessionUser,
    },
    /// Another member took over the room; connect to `addr`.
    RoomOwnerChanged {
        session: SessionHandle,
        owner: MemberId,
        addr: Option<SocketAddr>,
    },
    /// The session is gone. Its handle is already invalid.
    ForcedFromRoom {
        session: SessionHandle,
        reason: ForcedReason,
    },
    HostMigrationStarted {
        session: SessionHandle,
    },
    HostMigrationFinished {
        session: SessionHandle,
    },
}

impl LobbyEvent {
    pub fn session(&self) -> SessionHandle {
        match self {
            Self::UserJoined { session, .. }
            | Self::UserLeft { session, .. }
            | Self::UserUpdated { session, .. }
            | Self::RoomOwnerChanged { session, .. }
            | Self::ForcedFromRoom { session, .. }
            | Self::HostMigrationStarted { session }
            | Self::HostMigrationFinished { session } => *session,
        }
    }
}
