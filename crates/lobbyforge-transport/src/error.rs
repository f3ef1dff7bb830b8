/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection id is not (or no longer) known to the transport.
    #[error("unknown connection {0}")]
    UnknownConnection(crate::ConnectionId),

    /// The connection exists but is not in a state that can carry data.
    #[error("connection {0} is not connected")]
    NotConnected(crate::ConnectionId),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// The transport has no room for another connection.
    #[error("connection table full")]
    TableFull,
}
