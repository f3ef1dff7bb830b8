//! Peer connection abstraction for Lobbyforge.
//!
//! The lobby does not own sockets. It asks a [`Transport`] to open a
//! connection to a member once signaling produced an address, sends small
//! lobby packets over it, and reads back its state. Everything else
//! (framing, retransmission, encryption) belongs to the transport.
//!
//! The trait is synchronous on purpose: the lobby runs as a single-writer
//! state machine and must never await in the middle of a transition.
//! Implementations queue outbound data and return immediately.
//!
//! # Feature Flags
//!
//! - `memory` (default): [`MemoryTransport`], an in-process transport that
//!   records every packet. Used by tests and local loopback setups.

mod error;
#[cfg(feature = "memory")]
mod memory;

pub use error::TransportError;
#[cfg(feature = "memory")]
pub use memory::{MemoryTransport, SentPacket};

use std::fmt;
use std::net::SocketAddr;

/// Handle to one peer link, allocated by the [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Lifecycle of a transport connection as seen by the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Established and able to carry packets.
    Connected,
    /// Known to the transport but not usable (peer timed out or dropped).
    NotConnected,
    /// Being torn down. Must be freed before the peer can be reconnected.
    Freeing,
}

/// The operations the lobby consumes from the packet transport.
///
/// `Send + 'static` because the transport lives inside the lobby, which is
/// moved onto the scheduler task.
pub trait Transport: Send + 'static {
    /// Opens (or registers) a connection towards `addr`.
    fn open(&mut self, addr: SocketAddr) -> Result<ConnectionId, TransportError>;

    /// Queues `data` for delivery on `connection`.
    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError>;

    /// Current state of `connection`, or `None` if it is unknown.
    fn connection_state(&self, connection: ConnectionId) -> Option<ConnectionState>;

    /// The remote address of `connection`.
    fn resolve_address(&self, connection: ConnectionId) -> Option<SocketAddr>;

    /// Forces the state of `connection`, e.g. to
    /// [`ConnectionState::NotConnected`] when signaling declares the peer
    /// dead.
    fn set_state(&mut self, connection: ConnectionId, state: ConnectionState);

    /// Releases `connection`. Unknown ids are ignored.
    fn free(&mut self, connection: ConnectionId);
}
