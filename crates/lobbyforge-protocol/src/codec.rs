//! Codec trait and implementations for lobby packets.
//!
//! The lobby doesn't care how packets become bytes, only that something
//! implements [`Codec`]. [`JsonCodec`] is the default: readable in packet
//! captures, and lobby traffic is a handful of packets per session so size
//! doesn't matter.

use crate::{LobbyPacket, ProtocolError};

/// Converts lobby packets to bytes and back.
///
/// `Send + Sync + 'static` because the codec lives inside the lobby, which
/// is moved onto the scheduler task.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a packet.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode(&self, packet: &LobbyPacket) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes a packet.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] for malformed or truncated input.
    fn decode(&self, data: &[u8]) -> Result<LobbyPacket, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use lobbyforge_protocol::{Codec, ConnectionUid, JsonCodec, LobbyPacket, MemberId, RoomId};
///
/// let codec = JsonCodec;
/// let packet = LobbyPacket::HostMigrationStart {
///     from: ConnectionUid::new(RoomId(1), MemberId(2)),
/// };
/// let bytes = codec.encode(&packet).unwrap();
/// assert_eq!(codec.decode(&bytes).unwrap(), packet);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode(&self, packet: &LobbyPacket) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(packet).map_err(ProtocolError::Encode)
    }

    fn decode(&self, data: &[u8]) -> Result<LobbyPacket, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;

    #[test]
    fn test_decode_unknown_type_is_decode_error() {
        let err = JsonCodec.decode(br#"{"type":"Teleport"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_decode_truncated_input_is_decode_error() {
        let err = JsonCodec.decode(br#"{"type":"HostMigrationStart","from":{"ro"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }
}
