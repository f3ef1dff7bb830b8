//! Error types for the protocol layer.
//!
//! Everything that can go wrong while turning identifiers and packets into
//! bytes (or back) ends up here. Higher layers wrap this in their own error
//! enums, so a `ProtocolError` always means "the bytes were wrong", never
//! "the room was wrong".

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a packet failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserializing a packet failed (malformed, truncated, unknown type).
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A session id blob had the wrong size.
    ///
    /// Session ids travel inside invitations as a fixed-size blob, so
    /// any other length is a corrupted or foreign id.
    #[error("session id blob must be {expected} bytes, got {actual}")]
    BadSessionIdLength { expected: usize, actual: usize },

    /// A session id blob decoded to the all-zero id, or carried garbage
    /// in its web session field.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// A web session id was empty, too long, or not ASCII.
    #[error("invalid web session id: {0}")]
    InvalidWebSessionId(String),
}
