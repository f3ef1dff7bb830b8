//! In-process transport that records outbound packets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{ConnectionId, ConnectionState, Transport, TransportError};

/// One packet handed to [`MemoryTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub connection: ConnectionId,
    pub addr: SocketAddr,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct Entry {
    addr: SocketAddr,
    state: ConnectionState,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    capacity: Option<usize>,
    connections: HashMap<ConnectionId, Entry>,
    sent: Vec<SentPacket>,
}

/// A [`Transport`] that keeps everything in memory.
///
/// Cloning yields another handle to the same state, so a test can hand one
/// clone to the lobby and keep another to inspect what was sent:
///
/// ```rust
/// use lobbyforge_transport::{MemoryTransport, Transport};
///
/// let mut transport = MemoryTransport::new();
/// let probe = transport.clone();
/// let conn = transport.open("10.0.0.2:3658".parse().unwrap()).unwrap();
/// transport.send(conn, b"hello").unwrap();
/// assert_eq!(probe.sent().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that refuses to open more than `capacity` connections.
    pub fn with_capacity(capacity: usize) -> Self {
        let transport = Self::new();
        transport.lock().capacity = Some(capacity);
        transport
    }

    /// Every packet sent so far, in order.
    pub fn sent(&self) -> Vec<SentPacket> {
        self.lock().sent.clone()
    }

    /// Packets sent on one connection, in order.
    pub fn sent_to(&self, connection: ConnectionId) -> Vec<Vec<u8>> {
        self.lock()
            .sent
            .iter()
            .filter(|p| p.connection == connection)
            .map(|p| p.data.clone())
            .collect()
    }

    /// Drains and returns the sent-packet log.
    pub fn take_sent(&self) -> Vec<SentPacket> {
        std::mem::take(&mut self.lock().sent)
    }

    /// Number of connections not yet freed.
    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, addr: SocketAddr) -> Result<ConnectionId, TransportError> {
        let mut inner = self.lock();
        if inner
            .capacity
            .is_some_and(|cap| inner.connections.len() >= cap)
        {
            return Err(TransportError::TableFull);
        }
        inner.next_id += 1;
        let id = ConnectionId::new(inner.next_id);
        inner.connections.insert(
            id,
            Entry {
                addr,
                state: ConnectionState::Connected,
            },
        );
        tracing::debug!(%id, %addr, "memory connection opened");
        Ok(id)
    }

    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        let entry = inner
            .connections
            .get(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;
        if entry.state != ConnectionState::Connected {
            return Err(TransportError::NotConnected(connection));
        }
        let addr = entry.addr;
        inner.sent.push(SentPacket {
            connection,
            addr,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn connection_state(&self, connection: ConnectionId) -> Option<ConnectionState> {
        self.lock().connections.get(&connection).map(|e| e.state)
    }

    fn resolve_address(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.lock().connections.get(&connection).map(|e| e.addr)
    }

    fn set_state(&mut self, connection: ConnectionId, state: ConnectionState) {
        if let Some(entry) = self.lock().connections.get_mut(&connection) {
            entry.state = state;
        }
    }

    fn free(&mut self, connection: ConnectionId) {
        if self.lock().connections.remove(&connection).is_some() {
            tracing::debug!(%connection, "memory connection freed");
        }
    }
}
