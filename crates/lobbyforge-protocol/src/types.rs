//! Identity types shared by every Lobbyforge layer.
//!
//! A matchmaking service hands out a handful of small integers (world,
//! room, server, member) that are meaningless on their own but easy to mix
//! up. Each one gets its own newtype so the compiler catches a `RoomId`
//! passed where a `WorldId` is expected.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Platform identifiers
// ---------------------------------------------------------------------------

/// A shard ("world") of the matchmaking service that rooms are created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(pub u32);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W-{}", self.0)
    }
}

/// A room hosted by the matchmaking service. `RoomId(0)` is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// The matchmaking server a world belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub u16);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// A participant's slot id inside one room, assigned by the platform.
///
/// Member ids are only unique within a room; the same number in two rooms
/// names two different people.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub u16);

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

/// The platform account name of a room member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OnlineId(pub String);

impl OnlineId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OnlineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one end of a lobby connection: the room plus the member.
///
/// This is what peers put in the `from` field of every lobby packet so the
/// receiver can find the matching session and member without trusting the
/// transport address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionUid {
    pub room: RoomId,
    pub member: MemberId,
}

impl ConnectionUid {
    pub fn new(room: RoomId, member: MemberId) -> Self {
        Self { room, member }
    }
}

impl fmt::Display for ConnectionUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.room, self.member)
    }
}

// ---------------------------------------------------------------------------
// Web session id
// ---------------------------------------------------------------------------

/// The secondary web-API session identifier.
///
/// Invitable sessions are mirrored into the platform's web session service,
/// which hands back this id. It survives room rebinding, which is why the
/// host forwards it to joining clients and why it rides along in
/// [`SessionId`](crate::SessionId) blobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WebSessionId(String);

impl WebSessionId {
    /// Maximum length in bytes, fixed by the session id blob layout.
    pub const MAX_LEN: usize = 36;

    /// Validates and wraps a web session id.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidWebSessionId`] if the id is empty,
    /// longer than [`Self::MAX_LEN`], or contains non-ASCII or NUL bytes.
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if id.is_empty() || id.len() > Self::MAX_LEN {
            return Err(ProtocolError::InvalidWebSessionId(format!(
                "length {} outside 1..={}",
                id.len(),
                Self::MAX_LEN
            )));
        }
        if !id.bytes().all(|b| b.is_ascii() && b != 0) {
            return Err(ProtocolError::InvalidWebSessionId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for WebSessionId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WebSessionId> for String {
    fn from(value: WebSessionId) -> Self {
        value.0
    }
}

impl fmt::Display for WebSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Host hints
// ---------------------------------------------------------------------------

/// NAT classification reported by the local network stack.
///
/// Declaration order is quality order: `Open` is the best host candidate,
/// `Unknown` the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum NatType {
    Open,
    Moderate,
    Strict,
    #[default]
    Unknown,
}

/// How good a peer would be as the room owner.
///
/// Peers exchange these so the current host can decide whether somebody
/// else should take over, and so the platform can be told who to promote
/// if the host drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostHint {
    /// Number of peers this peer currently has a live connection to.
    pub active_connections: u32,
    /// Average round-trip time to those peers, in milliseconds.
    pub ping_ms: u32,
    /// Measured upstream bandwidth in bits per second.
    pub upstream_bps: u32,
    pub nat: NatType,
}

impl HostHint {
    /// Orders two hints by host quality. `Less` means `self` is the
    /// better host.
    ///
    /// Criteria, most significant first: more active connections, lower
    /// ping, more upstream bandwidth, better NAT type.
    pub fn priority_cmp(&self, other: &Self) -> Ordering {
        other
            .active_connections
            .cmp(&self.active_connections)
            .then_with(|| self.ping_ms.cmp(&other.ping_ms))
            .then_with(|| other.upstream_bps.cmp(&self.upstream_bps))
            .then_with(|| self.nat.cmp(&other.nat))
    }

    /// Returns `true` if `self` would make a strictly better host.
    pub fn outranks(&self, other: &Self) -> bool {
        self.priority_cmp(other) == Ordering::Less
    }
}

// ---------------------------------------------------------------------------
// Forced-from-room reasons
// ---------------------------------------------------------------------------

/// Why the local peer was removed from a room without asking to leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForcedReason {
    /// The platform removed us on the server's initiative.
    ServerForced,
    /// We left (seen when a leave races a room event).
    Left,
    /// The owner kicked us.
    Kicked,
    /// The platform reported an internal error.
    ServerInternalError,
    /// The connection to the platform broke.
    ConnectionError,
    /// The local user signed out.
    SignedOut,
    Unknown,
}

impl fmt::Display for ForcedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ServerForced => "server forced",
            Self::Left => "left",
            Self::Kicked => "kicked",
            Self::ServerInternalError => "server internal error",
            Self::ConnectionError => "connection error",
            Self::SignedOut => "signed out",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&RoomId(99)).unwrap();
        assert_eq!(json, "99");
    }

    #[test]
    fn test_id_display_prefixes() {
        assert_eq!(WorldId(7).to_string(), "W-7");
        assert_eq!(RoomId(3).to_string(), "R-3");
        assert_eq!(ServerId(1).to_string(), "S-1");
        assert_eq!(MemberId(4).to_string(), "M-4");
        assert_eq!(ConnectionUid::new(RoomId(3), MemberId(4)).to_string(), "R-3/M-4");
    }

    #[test]
    fn test_web_session_id_new_rejects_empty() {
        assert!(WebSessionId::new("").is_err());
    }

    #[test]
    fn test_web_session_id_new_rejects_too_long() {
        let long = "x".repeat(WebSessionId::MAX_LEN + 1);
        assert!(WebSessionId::new(long).is_err());
    }

    #[test]
    fn test_web_session_id_deserialize_validates() {
        let ok: WebSessionId = serde_json::from_str("\"abc-123\"").unwrap();
        assert_eq!(ok.as_str(), "abc-123");
        let bad: Result<WebSessionId, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    // -- HostHint ordering ------------------------------------------------

    #[test]
    fn test_priority_cmp_more_connections_wins() {
        let a = HostHint { active_connections: 3, ping_ms: 200, ..HostHint::default() };
        let b = HostHint { active_connections: 2, ping_ms: 10, ..HostHint::default() };
        assert!(a.outranks(&b));
        assert!(!b.outranks(&a));
    }

    #[test]
    fn test_priority_cmp_lower_ping_breaks_tie() {
        let a = HostHint { active_connections: 2, ping_ms: 40, ..HostHint::default() };
        let b = HostHint { active_connections: 2, ping_ms: 80, ..HostHint::default() };
        assert!(a.outranks(&b));
    }

    #[test]
    fn test_priority_cmp_nat_is_last_resort() {
        let open = HostHint { nat: NatType::Open, ..HostHint::default() };
        let strict = HostHint { nat: NatType::Strict, ..HostHint::default() };
        assert!(open.outranks(&strict));
    }

    #[test]
    fn test_priority_cmp_identical_hints_do_not_outrank() {
        let a = HostHint::default();
        assert!(!a.outranks(&a));
        assert_eq!(a.priority_cmp(&a), Ordering::Equal);
    }
}
