//! The session registry: every room the local peer is part of.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is not thread-safe by itself. It is owned by the
//! lobby, which is owned by the single scheduler task; platform threads
//! never touch it directly.

use std::fmt;
use std::time::Duration;

use lobbyforge_protocol::{MemberId, MemberSnapshot, RoomId};
use lobbyforge_transport::ConnectionId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{DeadMember, RoomMember, Session, SessionError, SlotArena, SlotKey};

/// Generation-checked handle to a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(SlotKey);

impl SessionHandle {
    pub fn key(&self) -> SlotKey {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Capacities of the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Sessions the local peer can be part of at once.
    pub max_sessions: usize,
    /// Members per session, the local member included.
    pub max_members: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            max_members: 16,
        }
    }
}

impl RegistryConfig {
    pub const MAX_SESSIONS: usize = 64;
    pub const MAX_MEMBERS: usize = 256;

    /// Clamps both capacities to `1..=MAX`.
    pub fn validated(mut self) -> Self {
        let sessions = self.max_sessions.clamp(1, Self::MAX_SESSIONS);
        if sessions != self.max_sessions {
            warn!(requested = self.max_sessions, using = sessions, "max_sessions out of range, clamping");
            self.max_sessions = sessions;
        }
        let members = self.max_members.clamp(2, Self::MAX_MEMBERS);
        if members != self.max_members {
            warn!(requested = self.max_members, using = members, "max_members out of range, clamping");
            self.max_members = members;
        }
        self
    }
}

/// A member that timed out, with the session it belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalingTimeout {
    pub session: SessionHandle,
    pub room: RoomId,
    pub member: MemberId,
    pub connection: Option<ConnectionId>,
}

#[derive(Debug)]
pub struct SessionRegistry {
    sessions: SlotArena<Session>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        let config = config.validated();
        Self {
            sessions: SlotArena::with_capacity(config.max_sessions),
            config,
        }
    }

    /// Allocates an empty session.
    ///
    /// # Errors
    /// Returns [`SessionError::OutOfSlots`] if every slot is in use.
    pub fn create_session(&mut self, as_host: bool) -> Result<SessionHandle, SessionError> {
        let key = self
            .sessions
            .insert(Session::new(as_host, self.config.max_members))
            .map_err(|_| SessionError::OutOfSlots)?;
        let handle = SessionHandle(key);
        info!(session = %handle, as_host, "session allocated");
        Ok(handle)
    }

    pub fn get(&self, handle: SessionHandle) -> Result<&Session, SessionError> {
        self.sessions
            .get(handle.0)
            .ok_or(SessionError::InvalidSession(handle))
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Result<&mut Session, SessionError> {
        self.sessions
            .get_mut(handle.0)
            .ok_or(SessionError::InvalidSession(handle))
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.sessions.contains(handle.0)
    }

    /// Releases a session. The handle (and every copy of it) goes stale.
    pub fn free(&mut self, handle: SessionHandle) -> Result<Session, SessionError> {
        let session = self
            .sessions
            .remove(handle.0)
            .ok_or(SessionError::InvalidSession(handle))?;
        info!(session = %handle, room = %session.room, "session freed");
        Ok(session)
    }

    /// The session bound to `room`, if any.
    pub fn find_by_room(&self, room: RoomId) -> Option<SessionHandle> {
        self.sessions
            .iter()
            .find(|(_, s)| s.room == room && room.0 != 0)
            .map(|(key, _)| SessionHandle(key))
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.sessions.keys().into_iter().map(SessionHandle).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SessionHandle, &Session)> {
        self.sessions.iter().map(|(key, s)| (SessionHandle(key), s))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // -- member table -----------------------------------------------------

    pub fn add_member(
        &mut self,
        handle: SessionHandle,
        snapshot: &MemberSnapshot,
        now: Instant,
    ) -> Result<&RoomMember, SessionError> {
        let session = self.get_mut(handle)?;
        let member = session.add_member(snapshot, now)?;
        debug!(
            session = %handle,
            member = %member.id,
            online_id = %member.online_id,
            owner = member.owner,
            me = member.is_me(),
            "member added"
        );
        Ok(member)
    }

    /// Removes a member. An absent member is not an error.
    pub fn remove_member(
        &mut self,
        handle: SessionHandle,
        member: MemberId,
    ) -> Result<Option<RoomMember>, SessionError> {
        let removed = self.get_mut(handle)?.remove_member(member);
        if removed.is_some() {
            debug!(session = %handle, %member, "member removed");
        }
        Ok(removed)
    }

    pub fn change_owner(
        &mut self,
        handle: SessionHandle,
        previous: MemberId,
        new: MemberId,
    ) -> Result<(), SessionError> {
        self.get_mut(handle)?.change_owner(previous, new)
    }

    /// Finds which session and member own `connection`.
    pub fn find_member_by_connection(
        &self,
        connection: ConnectionId,
    ) -> Option<(SessionHandle, MemberId)> {
        self.iter().find_map(|(handle, session)| {
            session
                .find_member_by_connection(connection)
                .map(|m| (handle, m.id))
        })
    }

    /// Runs [`Session::update_signaling`] on every session.
    pub fn update_signaling(&mut self, now: Instant, timeout: Duration) -> Vec<SignalingTimeout> {
        let mut timeouts = Vec::new();
        for (key, session) in self.sessions.iter_mut() {
            let room = session.room;
            for DeadMember { member, connection } in session.update_signaling(now, timeout) {
                timeouts.push(SignalingTimeout {
                    session: SessionHandle(key),
                    room,
                    member,
                    connection,
                });
            }
        }
        timeouts
    }
}

#[cfg(test)]
mod tests {
    use lobbyforge_protocol::OnlineId;

    use super::*;

    fn snapshot(member: u16, is_me: bool, owner: bool) -> MemberSnapshot {
        MemberSnapshot {
            member: MemberId(member),
            online_id: OnlineId::new(format!("player{member}")),
            owner,
            is_me,
            user_data: Vec::new(),
        }
    }

    #[test]
    fn test_create_session_out_of_slots() {
        let mut reg = SessionRegistry::new(RegistryConfig {
            max_sessions: 1,
            ..RegistryConfig::default()
        });
        reg.create_session(true).unwrap();
        assert!(matches!(reg.create_session(true), Err(SessionError::OutOfSlots)));
    }

    #[test]
    fn test_free_makes_handle_stale() {
        let mut reg = SessionRegistry::new(RegistryConfig::default());
        let h = reg.create_session(false).unwrap();
        reg.free(h).unwrap();
        assert!(matches!(reg.get(h), Err(SessionError::InvalidSession(_))));
        assert!(matches!(reg.free(h), Err(SessionError::InvalidSession(_))));
    }

    #[test]
    fn test_find_by_room_ignores_unbound_sessions() {
        let mut reg = SessionRegistry::new(RegistryConfig::default());
        let h = reg.create_session(true).unwrap();
        assert_eq!(reg.find_by_room(RoomId(0)), None);
        reg.get_mut(h).unwrap().room = RoomId(12);
        assert_eq!(reg.find_by_room(RoomId(12)), Some(h));
    }

    #[test]
    fn test_remove_member_absent_is_noop() {
        let mut reg = SessionRegistry::new(RegistryConfig::default());
        let h = reg.create_session(true).unwrap();
        assert!(reg.remove_member(h, MemberId(9)).unwrap().is_none());
    }

    #[test]
    fn test_validated_clamps_zero_sessions() {
        let cfg = RegistryConfig {
            max_sessions: 0,
            max_members: 1,
        }
        .validated();
        assert_eq!(cfg.max_sessions, 1);
        assert_eq!(cfg.max_members, 2);
    }

    #[test]
    fn test_find_member_by_connection_across_sessions() {
        let mut reg = SessionRegistry::new(RegistryConfig::default());
        let now = Instant::now();
        let _a = reg.create_session(true).unwrap();
        let b = reg.create_session(false).unwrap();
        reg.get_mut(b).unwrap().room = RoomId(2);
        reg.add_member(b, &snapshot(3, false, true), now).unwrap();
        reg.get_mut(b).unwrap().member_mut(MemberId(3)).unwrap().connection =
            Some(ConnectionId::new(77));

        assert_eq!(
            reg.find_member_by_connection(ConnectionId::new(77)),
            Some((b, MemberId(3)))
        );
        assert_eq!(reg.find_member_by_connection(ConnectionId::new(1)), None);
    }
}
