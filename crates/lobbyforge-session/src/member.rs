//! Room members.

use std::net::SocketAddr;

use lobbyforge_protocol::{HostHint, MemberId, MemberSnapshot, OnlineId};
use lobbyforge_transport::ConnectionId;
use tokio::time::Instant;

use crate::SignalingState;

/// Whether a member is the local peer or somebody else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Me,
    Other,
}

/// One participant of a room, the local peer included.
#[derive(Debug, Clone)]
pub struct RoomMember {
    pub id: MemberId,
    pub online_id: OnlineId,
    pub role: MemberRole,
    /// At most one member per session has this set.
    pub owner: bool,
    /// Valid once signaling reported the member as connected.
    pub addr: Option<SocketAddr>,
    pub signaling: SignalingState,
    pub user_data: Vec<u8>,
    /// The host has acknowledged our join. Only meaningful on the owner,
    /// from a joining client's point of view.
    pub host_join_ack: bool,
    pub connection: Option<ConnectionId>,
    pub host_hint: Option<HostHint>,
}

impl RoomMember {
    /// Builds a member from a platform snapshot. Other members start in
    /// `Pending` signaling; the local member has none.
    pub(crate) fn from_snapshot(snapshot: &MemberSnapshot, now: Instant) -> Self {
        let role = if snapshot.is_me {
            MemberRole::Me
        } else {
            MemberRole::Other
        };
        let signaling = match role {
            MemberRole::Me => SignalingState::None,
            MemberRole::Other => SignalingState::Pending { since: now },
        };
        Self {
            id: snapshot.member,
            online_id: snapshot.online_id.clone(),
            role,
            owner: snapshot.owner,
            addr: None,
            signaling,
            user_data: snapshot.user_data.clone(),
            host_join_ack: false,
            connection: None,
            host_hint: None,
        }
    }

    pub fn is_me(&self) -> bool {
        self.role == MemberRole::Me
    }

    pub fn is_other(&self) -> bool {
        self.role == MemberRole::Other
    }
}
