//! A single room the local peer is hosting or has joined.

use std::cmp::Ordering;
use std::time::Duration;

use lobbyforge_protocol::{
    ConnectionUid, HostHint, MEMBER_USER_DATA_LEN, MemberId, MemberSnapshot, RoomId, ServerId,
    SessionId, WebSessionId, WorldId,
};
use lobbyforge_transport::ConnectionId;
use tokio::time::Instant;

use crate::{HostMigrationInfo, RoomMember, SessionError, SignalingState, SignalingStatus};

/// Local state flags of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionFlags {
    pub host: bool,
    /// The game is in progress. Started sessions never migrate.
    pub started: bool,
    pub can_send_host_hints: bool,
    pub user_data_events_started: bool,
}

/// Flags the game chose when creating (or migrating) the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateFlags {
    pub searchable: bool,
    pub invitable: bool,
    pub migratable: bool,
    pub game_flags: u16,
}

impl Default for CreateFlags {
    fn default() -> Self {
        Self {
            searchable: true,
            invitable: false,
            migratable: true,
            game_flags: 0,
        }
    }
}

/// A member whose signaling timed out during
/// [`Session::update_signaling`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadMember {
    pub member: MemberId,
    pub connection: Option<ConnectionId>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub room: RoomId,
    pub world: WorldId,
    pub server: ServerId,
    pub game_type: u16,
    /// Our own identity in the room, known once the platform assigned us a
    /// member id.
    pub local: Option<ConnectionUid>,
    pub flags: SessionFlags,
    pub create_flags: CreateFlags,
    pub web_session: Option<WebSessionId>,
    pub migration: HostMigrationInfo,
    pub local_hint: HostHint,
    /// Set while a join waits for the owner's join acknowledgement.
    /// Cleared once the join completes.
    pub require_host_ack: bool,
    members: Vec<RoomMember>,
    max_members: usize,
}

impl Session {
    pub fn new(as_host: bool, max_members: usize) -> Self {
        Self {
            room: RoomId::default(),
            world: WorldId::default(),
            server: ServerId::default(),
            game_type: 0,
            local: None,
            flags: SessionFlags {
                host: as_host,
                ..SessionFlags::default()
            },
            create_flags: CreateFlags::default(),
            web_session: None,
            migration: HostMigrationInfo::default(),
            local_hint: HostHint::default(),
            require_host_ack: false,
            members: Vec::new(),
            max_members,
        }
    }

    pub fn is_host(&self) -> bool {
        self.flags.host
    }

    /// The shareable id of this session.
    pub fn session_id(&self) -> SessionId {
        let mut id = SessionId::new(self.world, self.room, self.server, self.game_type);
        id.web_session = self.web_session.clone();
        id
    }

    // -- members ----------------------------------------------------------

    pub fn members(&self) -> &[RoomMember] {
        &self.members
    }

    pub fn member(&self, id: MemberId) -> Option<&RoomMember> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn member_mut(&mut self, id: MemberId) -> Option<&mut RoomMember> {
        self.members.iter_mut().find(|m| m.id == id)
    }

    pub fn me(&self) -> Option<&RoomMember> {
        self.members.iter().find(|m| m.is_me())
    }

    pub fn owner(&self) -> Option<&RoomMember> {
        self.members.iter().find(|m| m.owner)
    }

    pub fn find_member_by_connection(&self, connection: ConnectionId) -> Option<&RoomMember> {
        self.members
            .iter()
            .find(|m| m.connection == Some(connection))
    }

    /// Remote members with an open connection, for broadcasts.
    pub fn connected_members(&self) -> impl Iterator<Item = &RoomMember> {
        self.members
            .iter()
            .filter(|m| m.is_other() && m.connection.is_some())
    }

    /// Adds a member from a platform snapshot.
    ///
    /// A local member sets [`Session::local`]. An owner entry clears the
    /// owner flag of everyone else so at most one owner remains.
    ///
    /// # Errors
    /// - [`SessionError::DuplicateMember`] if the id is already present.
    /// - [`SessionError::MemberTableFull`] if the room is full.
    pub fn add_member(
        &mut self,
        snapshot: &MemberSnapshot,
        now: Instant,
    ) -> Result<&RoomMember, SessionError> {
        if self.member(snapshot.member).is_some() {
            return Err(SessionError::DuplicateMember {
                room: self.room,
                member: snapshot.member,
            });
        }
        if self.members.len() >= self.max_members {
            return Err(SessionError::MemberTableFull { room: self.room });
        }

        let mut member = RoomMember::from_snapshot(snapshot, now);
        if member.user_data.len() > MEMBER_USER_DATA_LEN {
            tracing::warn!(
                room = %self.room,
                member = %member.id,
                len = member.user_data.len(),
                "member user data too long, truncating"
            );
            member.user_data.truncate(MEMBER_USER_DATA_LEN);
        }
        if member.owner {
            for other in &mut self.members {
                other.owner = false;
            }
        }
        if member.is_me() {
            self.local = Some(ConnectionUid::new(self.room, member.id));
        }

        let index = self.members.len();
        self.members.push(member);
        Ok(&self.members[index])
    }

    /// Removes a member. Removing an absent member returns `None`.
    pub fn remove_member(&mut self, id: MemberId) -> Option<RoomMember> {
        let index = self.members.iter().position(|m| m.id == id)?;
        Some(self.members.remove(index))
    }

    /// Moves the owner flag from `previous` to `new`. Every other member's
    /// flag is cleared as well.
    ///
    /// # Errors
    /// Returns [`SessionError::MemberNotFound`] if `new` is not a member.
    pub fn change_owner(&mut self, previous: MemberId, new: MemberId) -> Result<(), SessionError> {
        if self.member(new).is_none() {
            return Err(SessionError::MemberNotFound {
                room: self.room,
                member: new,
            });
        }
        for member in &mut self.members {
            member.owner = member.id == new;
        }
        tracing::debug!(room = %self.room, %previous, %new, "room owner changed");
        Ok(())
    }

    /// Forgets every member. Used when the room goes away.
    pub fn clear_members(&mut self) -> Vec<RoomMember> {
        std::mem::take(&mut self.members)
    }

    // -- signaling --------------------------------------------------------

    /// Times out stalled signaling.
    ///
    /// Members stuck in `Pending` longer than `timeout` go `Dead`. While
    /// [`require_host_ack`](Self::require_host_ack) is set, an owner that
    /// has been `Active` longer than `timeout` without acknowledging our
    /// join goes `Dead` too.
    pub fn update_signaling(&mut self, now: Instant, timeout: Duration) -> Vec<DeadMember> {
        let require_ack = self.require_host_ack;
        let mut dead = Vec::new();
        for member in &mut self.members {
            let expired = match member.signaling {
                SignalingState::Pending { since } => now.saturating_duration_since(since) > timeout,
                SignalingState::Active { since } => {
                    require_ack
                        && member.owner
                        && !member.host_join_ack
                        && now.saturating_duration_since(since) > timeout
                }
                SignalingState::None | SignalingState::Dead => false,
            };
            if expired && member.signaling.kill() {
                tracing::warn!(room = %self.room, member = %member.id, "signaling timed out");
                dead.push(DeadMember {
                    member: member.id,
                    connection: member.connection,
                });
            }
        }
        dead
    }

    /// Signaling status of the session as a whole, judged by its owner.
    pub fn check_signaling(&self) -> SignalingStatus {
        let Some(owner) = self.owner() else {
            return SignalingStatus::None;
        };
        if owner.is_me() {
            return SignalingStatus::Active;
        }
        match owner.signaling.status() {
            SignalingStatus::Active if owner.host_join_ack || !self.require_host_ack => {
                SignalingStatus::Active
            }
            SignalingStatus::Active => SignalingStatus::Pending,
            other => other,
        }
    }

    // -- host hints -------------------------------------------------------

    /// The remote member that would make the best host: active signaling,
    /// a reported hint, best hint first and lowest member id on ties.
    pub fn best_host_candidate(&self) -> Option<(MemberId, HostHint)> {
        self.members
            .iter()
            .filter(|m| m.is_other() && m.signaling.is_active())
            .filter_map(|m| m.host_hint.map(|hint| (m.id, hint)))
            .min_by(|(a_id, a), (b_id, b)| rank(a, *a_id, b, *b_id))
    }

    /// Every member ordered by host quality, best first. The local member
    /// is ranked by [`local_hint`](Self::local_hint); members that never
    /// reported a hint are ranked with the default (worst) hint.
    pub fn owner_privilege_rank(&self) -> Vec<MemberId> {
        let mut ranked: Vec<(MemberId, HostHint)> = self
            .members
            .iter()
            .map(|m| {
                let hint = if m.is_me() {
                    self.local_hint
                } else {
                    m.host_hint.unwrap_or_default()
                };
                (m.id, hint)
            })
            .collect();
        ranked.sort_by(|(a_id, a), (b_id, b)| rank(a, *a_id, b, *b_id));
        ranked.into_iter().map(|(id, _)| id).collect()
    }
}

fn rank(a: &HostHint, a_id: MemberId, b: &HostHint, b_id: MemberId) -> Ordering {
    a.priority_cmp(b).then_with(|| a_id.cmp(&b_id))
}
