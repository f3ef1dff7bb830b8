//! The opaque, invitation-safe session identifier.
//!
//! A [`SessionId`] is what one peer hands to another (inside an invite,
//! a friend list entry, a search result) so the receiver can join the same
//! room. It must survive being copied through foreign systems as raw bytes,
//! so it has a fixed-size binary form:
//!
//! ```text
//! offset  size  field
//!      0     4  world id        (u32, little endian)
//!      4     8  room id         (u64, little endian)
//!     12     2  server id       (u16, little endian)
//!     14     2  game type tag   (u16, little endian)
//!     16     1  flags           (bit 0: came from an invite)
//!     17    36  web session id  (ASCII, NUL padded, may be empty)
//! ```
//!
//! The all-zero blob is the "no session" id and never decodes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, RoomId, ServerId, WebSessionId, WorldId};

/// Size in bytes of an encoded [`SessionId`].
pub const SESSION_ID_LEN: usize = 17 + WebSessionId::MAX_LEN;

const FLAG_FROM_INVITE: u8 = 0x01;

/// Everything needed to find and join a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub world: WorldId,
    pub room: RoomId,
    pub server: ServerId,
    /// Game-defined tag (game mode, playlist...) carried opaquely.
    pub game_type: u16,
    /// Set when the id was obtained through an invitation, which lets the
    /// joiner claim a private slot.
    pub from_invite: bool,
    /// The web session mirror of the room, present for invitable sessions.
    pub web_session: Option<WebSessionId>,
}

impl SessionId {
    pub fn new(world: WorldId, room: RoomId, server: ServerId, game_type: u16) -> Self {
        Self {
            world,
            room,
            server,
            game_type,
            from_invite: false,
            web_session: None,
        }
    }

    pub fn with_web_session(mut self, web_session: WebSessionId) -> Self {
        self.web_session = Some(web_session);
        self
    }

    pub fn with_from_invite(mut self, from_invite: bool) -> Self {
        self.from_invite = from_invite;
        self
    }

    /// An id is valid if it names a room somewhere. The all-zero id is the
    /// sentinel for "no session".
    pub fn is_valid(&self) -> bool {
        self.room.0 != 0 || self.world.0 != 0 || self.server.0 != 0
    }

    /// Encodes the id into its fixed-size blob.
    pub fn to_bytes(&self) -> [u8; SESSION_ID_LEN] {
        let mut out = [0u8; SESSION_ID_LEN];
        out[0..4].copy_from_slice(&self.world.0.to_le_bytes());
        out[4..12].copy_from_slice(&self.room.0.to_le_bytes());
        out[12..14].copy_from_slice(&self.server.0.to_le_bytes());
        out[14..16].copy_from_slice(&self.game_type.to_le_bytes());
        if self.from_invite {
            out[16] |= FLAG_FROM_INVITE;
        }
        if let Some(web) = &self.web_session {
            let bytes = web.as_str().as_bytes();
            out[17..17 + bytes.len()].copy_from_slice(bytes);
        }
        out
    }

    /// Decodes a blob produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    /// - [`ProtocolError::BadSessionIdLength`] if `bytes` is not exactly
    ///   [`SESSION_ID_LEN`] long.
    /// - [`ProtocolError::InvalidSessionId`] for the all-zero blob or a
    ///   web session field that is not NUL-padded ASCII.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let blob: &[u8; SESSION_ID_LEN] =
            bytes
                .try_into()
                .map_err(|_| ProtocolError::BadSessionIdLength {
                    expected: SESSION_ID_LEN,
                    actual: bytes.len(),
                })?;

        if blob.iter().all(|&b| b == 0) {
            return Err(ProtocolError::InvalidSessionId("all-zero id".into()));
        }

        let world = u32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
        let mut room = [0u8; 8];
        room.copy_from_slice(&blob[4..12]);
        let server = u16::from_le_bytes([blob[12], blob[13]]);
        let game_type = u16::from_le_bytes([blob[14], blob[15]]);
        let from_invite = blob[16] & FLAG_FROM_INVITE != 0;

        let web_field = &blob[17..];
        let web_len = web_field.iter().position(|&b| b == 0).unwrap_or(web_field.len());
        if web_field[web_len..].iter().any(|&b| b != 0) {
            return Err(ProtocolError::InvalidSessionId(
                "web session id is not NUL padded".into(),
            ));
        }
        let web_session = if web_len == 0 {
            None
        } else {
            let text = std::str::from_utf8(&web_field[..web_len])
                .map_err(|e| ProtocolError::InvalidSessionId(e.to_string()))?;
            Some(WebSessionId::new(text)?)
        };

        Ok(Self {
            world: WorldId(world),
            room: RoomId(u64::from_le_bytes(room)),
            server: ServerId(server),
            game_type,
            from_invite,
            web_session,
        })
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.world, self.room, self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionId {
        SessionId::new(WorldId(7), RoomId(0x1122_3344_5566_7788), ServerId(3), 2)
    }

    #[test]
    fn test_to_bytes_layout_is_little_endian() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[0..4], &[7, 0, 0, 0]);
        assert_eq!(bytes[4], 0x88);
        assert_eq!(&bytes[12..14], &[3, 0]);
        assert_eq!(&bytes[14..16], &[2, 0]);
        assert_eq!(bytes[16], 0);
    }

    #[test]
    fn test_from_bytes_restores_room_world_server() {
        let id = sample()
            .with_from_invite(true)
            .with_web_session(WebSessionId::new("0b1f-session").unwrap());
        let decoded = SessionId::from_bytes(&id.to_bytes()).unwrap();
        assert_eq!(decoded, id);
        assert_eq!(decoded.room, RoomId(0x1122_3344_5566_7788));
        assert_eq!(decoded.world, WorldId(7));
        assert_eq!(decoded.server, ServerId(3));
    }

    #[test]
    fn test_from_bytes_wrong_length_rejected() {
        let err = SessionId::from_bytes(&[1u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::BadSessionIdLength { expected: SESSION_ID_LEN, actual: 10 }
        ));
    }

    #[test]
    fn test_from_bytes_all_zero_rejected() {
        let err = SessionId::from_bytes(&[0u8; SESSION_ID_LEN]).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSessionId(_)));
    }

    #[test]
    fn test_from_bytes_garbage_after_nul_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[17] = b'a';
        bytes[19] = b'b';
        assert!(SessionId::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_is_valid_false_for_default_triple() {
        let id = SessionId::new(WorldId(0), RoomId(0), ServerId(0), 5);
        assert!(!id.is_valid());
        assert!(sample().is_valid());
    }
}
