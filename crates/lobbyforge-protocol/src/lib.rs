//! Shared vocabulary for Lobbyforge.
//!
//! - **Identifiers** ([`WorldId`], [`RoomId`], [`MemberId`], ...) and the
//!   invitation-safe [`SessionId`] blob.
//! - **Lobby packets** ([`LobbyPacket`]) that peers exchange directly, and
//!   the [`Codec`] that turns them into bytes.
//! - **Platform types** ([`PlatformRequest`], [`PlatformEvent`], ...) that
//!   describe the conversation with the matchmaking service.
//! - **Session data** ([`SessionUserData`], [`SearchFilter`], ...) that
//!   games attach to rooms.
//!
//! This crate holds no state. It only defines what travels between the
//! lobby, its peers and the platform.

mod codec;
mod error;
mod packet;
mod platform;
mod session_id;
mod types;
mod user_data;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use packet::LobbyPacket;
pub use platform::{
    AttributeFilter, JobId, MemberSnapshot, PlatformErrorCode, PlatformEvent, PlatformRequest,
    PlatformResponse, RequestId, RequestKind, RoomAttributes, RoomCreateParams, RoomEvent,
    RoomSnapshot, RoomSummary, SignalingEvent, WebJob, WebJobResponse, WorldInfo,
};
pub use session_id::{SESSION_ID_LEN, SessionId};
pub use types::{
    ConnectionUid, ForcedReason, HostHint, MemberId, NatType, OnlineId, RoomId, ServerId,
    WebSessionId, WorldId,
};
pub use user_data::{
    BINARY_ATTRIBUTE_LEN, CompareOp, MEMBER_USER_DATA_LEN, SEARCHABLE_ATTRIBUTE_COUNT,
    SearchFilter, SessionUserData, UserDataDescriptor, UserDataId, UserDataType, UserDataValue,
};
