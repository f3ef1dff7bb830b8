//! Application-level packets exchanged directly between room members.
//!
//! These ride on the peer transport once signaling has succeeded. They are
//! deliberately tiny: every one names its sender with a [`ConnectionUid`]
//! and carries at most a web session id or a host hint.

use serde::{Deserialize, Serialize};

use crate::{ConnectionUid, HostHint, WebSessionId};

/// A lobby packet.
///
/// Internally tagged, so on the JSON codec a join acknowledgement reads
/// `{"type":"JoinSessionAck","from":{...},"web_session":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyPacket {
    /// Host → joining client: "I can hear you." Confirms the host side of
    /// the peer link and forwards the web session id for invitable rooms.
    JoinSessionAck {
        from: ConnectionUid,
        web_session: Option<WebSessionId>,
    },

    /// Host → everyone: "I am handing the room over, start migrating."
    HostMigrationStart { from: ConnectionUid },

    /// New host → everyone: "I have taken over, point at me."
    HostMigrationServer { from: ConnectionUid },

    /// Client → host: the sender's current host quality.
    HostHint { from: ConnectionUid, hint: HostHint },
}

impl LobbyPacket {
    /// The connection identity of whoever sent this packet.
    pub fn from(&self) -> ConnectionUid {
        match self {
            Self::JoinSessionAck { from, .. }
            | Self::HostMigrationStart { from }
            | Self::HostMigrationServer { from }
            | Self::HostHint { from, .. } => *from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemberId, RoomId};

    #[test]
    fn test_join_ack_json_is_internally_tagged() {
        let packet = LobbyPacket::JoinSessionAck {
            from: ConnectionUid::new(RoomId(5), MemberId(1)),
            web_session: None,
        };
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["type"], "JoinSessionAck");
        assert_eq!(json["from"]["room"], 5);
    }

    #[test]
    fn test_from_returns_sender() {
        let uid = ConnectionUid::new(RoomId(9), MemberId(3));
        let packet = LobbyPacket::HostMigrationServer { from: uid };
        assert_eq!(packet.from(), uid);
    }
}
