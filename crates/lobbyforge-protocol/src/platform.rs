//! Typed requests to, and events from, the platform matchmaking service.
//!
//! The service is treated as an opaque remote: the lobby issues a
//! [`PlatformRequest`], gets a [`RequestId`] back immediately, and later
//! receives a [`PlatformEvent::Response`] carrying the same id. Room
//! membership changes, peer signaling and fatal errors arrive as
//! unsolicited events. Secondary web-API work (web sessions and their
//! advertisement data) follows the same pattern with [`JobId`]s.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::user_data::{CompareOp, SEARCHABLE_ATTRIBUTE_COUNT};
use crate::{ForcedReason, MemberId, OnlineId, RoomId, ServerId, WebSessionId, WorldId};

// ---------------------------------------------------------------------------
// Correlation tokens
// ---------------------------------------------------------------------------

/// Correlation id of an outstanding platform request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u32);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Correlation id of an outstanding web-API job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Discriminant of a [`PlatformRequest`], echoed back in its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    GetWorldInfoList,
    CreateJoinRoom,
    JoinRoom,
    LeaveRoom,
    SearchRoom,
    GetPingInfo,
    SetRoomDataExternal,
    SetRoomDataInternal,
    GetRoomDataExternalList,
    SetRoomMemberDataInternal,
    GrantRoomOwner,
}

/// Room attributes as the platform stores them: a few searchable integers
/// plus one opaque binary bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoomAttributes {
    pub searchable: [Option<i32>; SEARCHABLE_ATTRIBUTE_COUNT],
    pub binary: Vec<u8>,
}

/// Integer constraint on a searchable attribute slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeFilter {
    pub slot: usize,
    pub op: CompareOp,
    pub value: i32,
}

impl AttributeFilter {
    /// Returns `true` if `attributes` satisfies this filter. Unset slots
    /// never match.
    pub fn accepts(&self, attributes: &RoomAttributes) -> bool {
        attributes
            .searchable
            .get(self.slot)
            .copied()
            .flatten()
            .is_some_and(|v| self.op.matches(v, self.value))
    }
}

/// Parameters of a create-and-join room request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCreateParams {
    pub world: WorldId,
    pub public_slots: u32,
    pub private_slots: u32,
    /// Hidden rooms never show up in searches.
    pub hidden: bool,
    /// Let the platform promote a new owner by itself if the owner drops.
    pub auto_grant_owner: bool,
    /// Game flags, echoed to joiners in the room snapshot.
    pub game_flags: u16,
    pub attributes: RoomAttributes,
}

/// A request the lobby sends to the matchmaking service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformRequest {
    GetWorldInfoList { server: ServerId },
    CreateJoinRoom(RoomCreateParams),
    JoinRoom { room: RoomId },
    LeaveRoom { room: RoomId },
    SearchRoom {
        world: WorldId,
        filters: Vec<AttributeFilter>,
        max_results: u32,
    },
    /// Latency probe towards a room's owner.
    GetPingInfo { room: RoomId },
    SetRoomDataExternal {
        room: RoomId,
        attributes: RoomAttributes,
    },
    /// Pushes the owner-succession list used if the owner drops.
    SetRoomDataInternal {
        room: RoomId,
        owner_privilege_rank: Vec<MemberId>,
    },
    GetRoomDataExternalList { rooms: Vec<RoomId> },
    SetRoomMemberDataInternal { room: RoomId, data: Vec<u8> },
    GrantRoomOwner { room: RoomId, new_owner: MemberId },
}

impl PlatformRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::GetWorldInfoList { .. } => RequestKind::GetWorldInfoList,
            Self::CreateJoinRoom(_) => RequestKind::CreateJoinRoom,
            Self::JoinRoom { .. } => RequestKind::JoinRoom,
            Self::LeaveRoom { .. } => RequestKind::LeaveRoom,
            Self::SearchRoom { .. } => RequestKind::SearchRoom,
            Self::GetPingInfo { .. } => RequestKind::GetPingInfo,
            Self::SetRoomDataExternal { .. } => RequestKind::SetRoomDataExternal,
            Self::SetRoomDataInternal { .. } => RequestKind::SetRoomDataInternal,
            Self::GetRoomDataExternalList { .. } => RequestKind::GetRoomDataExternalList,
            Self::SetRoomMemberDataInternal { .. } => RequestKind::SetRoomMemberDataInternal,
            Self::GrantRoomOwner { .. } => RequestKind::GrantRoomOwner,
        }
    }
}

/// Secondary web-API work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebJob {
    CreateSession { room: RoomId, max_slots: u32 },
    JoinSession { session: WebSessionId },
    LeaveSession { session: WebSessionId },
    UpdateAdvertisement { session: WebSessionId, data: Vec<u8> },
    GetAdvertisement { session: WebSessionId },
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Population statistics of one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldInfo {
    pub id: WorldId,
    pub num_rooms: u32,
    /// Total members across every room on this world.
    pub num_members: u32,
}

/// One member as listed in a room snapshot or join event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub member: MemberId,
    pub online_id: OnlineId,
    pub owner: bool,
    /// Set on exactly one entry of a snapshot: the local peer.
    pub is_me: bool,
    pub user_data: Vec<u8>,
}

/// State of a room right after creating or joining it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room: RoomId,
    pub world: WorldId,
    pub server: ServerId,
    pub game_flags: u16,
    pub members: Vec<MemberSnapshot>,
}

/// Externally visible description of a room (search results, queries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room: RoomId,
    pub world: WorldId,
    pub server: ServerId,
    pub owner: Option<OnlineId>,
    pub public_slots: u32,
    pub open_public_slots: u32,
    pub private_slots: u32,
    pub open_private_slots: u32,
    pub attributes: RoomAttributes,
}

impl RoomSummary {
    /// Public slots currently taken.
    pub fn filled_public_slots(&self) -> u32 {
        self.public_slots.saturating_sub(self.open_public_slots)
    }
}

/// Successful payload of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformResponse {
    WorldInfoList(Vec<WorldInfo>),
    RoomCreated(RoomSnapshot),
    RoomJoined(RoomSnapshot),
    RoomsFound(Vec<RoomSummary>),
    PingInfo { rtt: Duration },
    RoomDataList(Vec<RoomSummary>),
    /// Requests with no payload (leave, set data, grant owner).
    Done,
}

/// Successful payload of a web job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebJobResponse {
    SessionCreated(WebSessionId),
    Advertisement(Vec<u8>),
    Done,
}

/// Error reported by the platform for one request or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformErrorCode {
    RoomNotFound,
    RoomFull,
    Code(i32),
}

impl fmt::Display for PlatformErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoomNotFound => f.write_str("room not found"),
            Self::RoomFull => f.write_str("room full"),
            Self::Code(code) => write!(f, "platform error {code:#010x}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Peer connectivity update for one member of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingEvent {
    /// The peer link is up; `addr` is where the member can be reached.
    Connected { addr: SocketAddr },
    Dead,
    /// Network info refresh; carries nothing the lobby acts on.
    NetInfo,
}

/// Unsolicited change to a room the local peer is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    MemberJoined(MemberSnapshot),
    MemberLeft(MemberId),
    OwnerChanged { previous: MemberId, new: MemberId },
    Kicked { reason: ForcedReason },
    Destroyed { reason: ForcedReason },
    MemberDataUpdated { member: MemberId, data: Vec<u8> },
}

/// Everything the platform layer can push into the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Response {
        request: RequestId,
        kind: RequestKind,
        result: Result<PlatformResponse, PlatformErrorCode>,
    },
    Signaling {
        room: RoomId,
        member: MemberId,
        event: SignalingEvent,
    },
    Room { room: RoomId, event: RoomEvent },
    /// The platform connection itself failed.
    Fatal { code: PlatformErrorCode },
    Job {
        job: JobId,
        result: Result<WebJobResponse, PlatformErrorCode>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let req = PlatformRequest::GrantRoomOwner {
            room: RoomId(1),
            new_owner: MemberId(2),
        };
        assert_eq!(req.kind(), RequestKind::GrantRoomOwner);
        assert_eq!(
            PlatformRequest::GetWorldInfoList { server: ServerId(1) }.kind(),
            RequestKind::GetWorldInfoList
        );
    }

    #[test]
    fn test_attribute_filter_unset_slot_never_matches() {
        let filter = AttributeFilter { slot: 2, op: CompareOp::Ne, value: 0 };
        assert!(!filter.accepts(&RoomAttributes::default()));
    }

    #[test]
    fn test_attribute_filter_out_of_range_slot_never_matches() {
        let filter = AttributeFilter { slot: 99, op: CompareOp::Eq, value: 0 };
        assert!(!filter.accepts(&RoomAttributes::default()));
    }

    #[test]
    fn test_filled_public_slots_saturates() {
        let summary = RoomSummary {
            room: RoomId(1),
            world: WorldId(1),
            server: ServerId(1),
            owner: None,
            public_slots: 4,
            open_public_slots: 6,
            private_slots: 0,
            open_private_slots: 0,
            attributes: RoomAttributes::default(),
        };
        assert_eq!(summary.filled_public_slots(), 0);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(PlatformErrorCode::RoomFull.to_string(), "room full");
        assert_eq!(PlatformErrorCode::Code(0x10).to_string(), "platform error 0x00000010");
    }
}
