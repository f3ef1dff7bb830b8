//! Routes inbound platform events and peer packets to the task, session or
//! member they belong to.
//!
//! - Responses and web job results go to the task whose current step
//!   awaits that exact request kind and id (or, for latency probes, to the
//!   search that issued them).
//! - Signaling and room events go to the session bound to the room.
//! - A fatal event fails everything.
//! - Packets go to the session and member owning the sending connection.
//!
//! Handlers never deliver completions themselves; they only stop or fail
//! tasks. Call [`Lobby::deliver_completions`] after a batch.

use std::net::SocketAddr;

use lobbyforge_protocol::{
    JobId, LobbyPacket, MEMBER_USER_DATA_LEN, MemberId, PlatformErrorCode, PlatformEvent,
    PlatformRequest, PlatformResponse, RequestId, RequestKind, RoomEvent, RoomId, SignalingEvent,
    WebJobResponse,
};
use lobbyforge_session::{SessionError, SessionHandle};
use lobbyforge_transport::{ConnectionId, ConnectionState};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::{LobbyEvent, SessionUser};
use crate::service::Inbound;
use crate::task::{Awaiting, TaskKind, TaskState};
use crate::{Lobby, LobbyError, TaskId};

type ResponseHandler = fn(&mut Lobby, TaskId, Result<PlatformResponse, PlatformErrorCode>);
type JobHandler = fn(&mut Lobby, TaskId, Result<WebJobResponse, PlatformErrorCode>);

impl Lobby {
    /// Feeds one item from the inbound queue. Returns `false` if nothing
    /// claimed it.
    pub fn on_inbound(&mut self, inbound: Inbound) -> bool {
        match inbound {
            Inbound::Platform(event) => self.on_platform_event(event),
            Inbound::Packet { from, data } => self.on_packet(from, &data),
        }
    }

    /// Feeds one platform event. Returns `false` if nothing claimed it.
    pub fn on_platform_event(&mut self, event: PlatformEvent) -> bool {
        self.now = Instant::now();
        match event {
            PlatformEvent::Response {
                request,
                kind,
                result,
            } => self.on_response(request, kind, result),
            PlatformEvent::Job { job, result } => self.on_job(job, result),
            PlatformEvent::Signaling {
                room,
                member,
                event,
            } => self.on_signaling(room, member, event),
            PlatformEvent::Room { room, event } => self.on_room_event(room, event),
            PlatformEvent::Fatal { code } => {
                self.fatal(code);
                true
            }
        }
    }

    // -- responses --------------------------------------------------------

    fn on_response(
        &mut self,
        request: RequestId,
        kind: RequestKind,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) -> bool {
        let awaited = Awaiting::Request(kind, request);
        if let Some(id) = self.tasks.find(|t| t.kind.awaiting() == awaited) {
            debug!(task = %id, %request, ?kind, "response correlated");
            if self.is_cancelling(id) {
                self.on_cancelled_response(id, kind, result);
                return true;
            }
            let session = self.tasks.get(id).and_then(|t| t.session);
            if session.is_some_and(|session| !self.sessions.contains(session)) {
                self.leave_stray_room(&result);
                self.tasks.fail(id, LobbyError::InvalidSession);
                return true;
            }
            let handler: Option<ResponseHandler> = match self.tasks.get(id).map(|t| &t.kind) {
                Some(TaskKind::Create(_)) => Some(Self::on_create_response),
                Some(TaskKind::Join(_)) => Some(Self::on_join_response),
                Some(TaskKind::Search(_)) => Some(Self::on_search_response),
                Some(TaskKind::Delete(_)) => Some(Self::on_delete_response),
                Some(TaskKind::Query(_)) => Some(Self::on_query_response),
                Some(TaskKind::SetLocalUserData(_)) => Some(Self::on_set_local_user_data_response),
                Some(TaskKind::SendHostHint(_)) => Some(Self::on_host_hint_response),
                Some(TaskKind::Update(_) | TaskKind::EnsureBestHost(_)) => {
                    Some(Self::on_done_response)
                }
                _ => None,
            };
            return match handler {
                Some(handler) => {
                    handler(self, id, result);
                    true
                }
                None => false,
            };
        }

        if let Some(id) = self.tasks.find(|t| t.kind.awaits_probe(request)) {
            if self.is_cancelling(id) {
                self.tasks.fail(id, LobbyError::Cancelled);
            } else {
                self.on_probe_response(id, request, result);
            }
            return true;
        }

        debug!(%request, ?kind, "response matched no task");
        self.leave_stray_room(&result);
        false
    }

    /// Leaves a room the platform put us in that no session is bound to,
    /// e.g. after the session was deleted while the create was in flight.
    fn leave_stray_room(&mut self, result: &Result<PlatformResponse, PlatformErrorCode>) {
        let Ok(PlatformResponse::RoomCreated(snapshot) | PlatformResponse::RoomJoined(snapshot)) =
            result
        else {
            return;
        };
        if self.sessions.find_by_room(snapshot.room).is_some() {
            return;
        }
        info!(room = %snapshot.room, "entered room has no session, leaving");
        self.issue_untracked(PlatformRequest::LeaveRoom {
            room: snapshot.room,
        });
    }

    fn is_cancelling(&self, id: TaskId) -> bool {
        self.tasks
            .get(id)
            .is_some_and(|t| t.state == TaskState::Cancelling)
    }

    /// The awaited request came back after cancellation. A room we got
    /// into anyway is left again.
    fn on_cancelled_response(
        &mut self,
        id: TaskId,
        kind: RequestKind,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        match (kind, result) {
            (
                RequestKind::CreateJoinRoom | RequestKind::JoinRoom,
                Ok(PlatformResponse::RoomCreated(snapshot) | PlatformResponse::RoomJoined(snapshot)),
            ) => {
                info!(task = %id, room = %snapshot.room, "room entered after cancel, leaving");
                self.issue_untracked(PlatformRequest::LeaveRoom {
                    room: snapshot.room,
                });
                self.tasks.fail(id, LobbyError::IllegalSessionJoin);
            }
            (RequestKind::CreateJoinRoom | RequestKind::JoinRoom, _) => {
                self.tasks.fail(id, LobbyError::IllegalSessionJoin);
            }
            _ => {
                self.tasks.fail(id, LobbyError::Cancelled);
            }
        }
    }

    fn on_job(&mut self, job: JobId, result: Result<WebJobResponse, PlatformErrorCode>) -> bool {
        let Some(id) = self.tasks.find(|t| t.kind.awaiting() == Awaiting::Job(job)) else {
            debug!(%job, "job result matched no task");
            return false;
        };
        debug!(task = %id, %job, "job result correlated");
        if self.is_cancelling(id) {
            self.tasks.fail(id, LobbyError::Cancelled);
            return true;
        }
        let handler: Option<JobHandler> = match self.tasks.get(id).map(|t| &t.kind) {
            Some(TaskKind::Create(_)) => Some(Self::on_create_job),
            Some(TaskKind::Join(_)) => Some(Self::on_join_job),
            Some(TaskKind::Delete(_)) => Some(Self::on_delete_job),
            Some(TaskKind::SetAdvertisement(_) | TaskKind::GetAdvertisement(_)) => {
                Some(Self::on_advertisement_job)
            }
            _ => None,
        };
        match handler {
            Some(handler) => {
                handler(self, id, result);
                true
            }
            None => false,
        }
    }

    // -- signaling --------------------------------------------------------

    fn on_signaling(&mut self, room: RoomId, member: MemberId, event: SignalingEvent) -> bool {
        let Some(session) = self.sessions.find_by_room(room) else {
            debug!(%room, %member, "signaling event for unknown room");
            return false;
        };
        match event {
            SignalingEvent::Connected { addr } => self.on_signaling_connected(session, member, addr),
            SignalingEvent::Dead => {
                let Ok(s) = self.sessions.get_mut(session) else {
                    return false;
                };
                let Some(m) = s.member_mut(member) else {
                    return false;
                };
                if m.signaling.kill() {
                    warn!(%session, %member, "signaling died");
                    if let Some(connection) = m.connection {
                        self.transport.set_state(connection, ConnectionState::NotConnected);
                    }
                }
                true
            }
            SignalingEvent::NetInfo => {
                debug!(%session, %member, "net info update");
                true
            }
        }
    }

    fn on_signaling_connected(
        &mut self,
        session: SessionHandle,
        member: MemberId,
        addr: SocketAddr,
    ) -> bool {
        let now = self.now;
        let Ok(s) = self.sessions.get_mut(session) else {
            return false;
        };
        let Some(m) = s.member_mut(member) else {
            debug!(%session, %member, "signaling for unknown member");
            return false;
        };
        if !m.signaling.activate(now) {
            debug!(%session, %member, state = ?m.signaling.status(), "connected event ignored");
            return true;
        }
        m.addr = Some(addr);

        let reusable = match m.connection {
            Some(connection) => match self.transport.connection_state(connection) {
                Some(ConnectionState::Connected) => Some(connection),
                Some(_) => {
                    self.transport.free(connection);
                    None
                }
                None => None,
            },
            None => None,
        };
        m.connection = match reusable {
            Some(connection) => Some(connection),
            None => match self.transport.open(addr) {
                Ok(connection) => Some(connection),
                Err(err) => {
                    warn!(%session, %member, %addr, error = %err, "could not open connection");
                    None
                }
            },
        };
        let connection = m.connection;
        let user = SessionUser::from(&*m);
        debug!(%session, %member, %addr, "signaling active");

        let events_started = s.flags.user_data_events_started;
        let ack = match (s.is_host(), connection, s.local) {
            (true, Some(connection), Some(from)) => Some((
                connection,
                LobbyPacket::JoinSessionAck {
                    from,
                    web_session: s.web_session.clone(),
                },
            )),
            _ => None,
        };

        if events_started {
            self.emit(LobbyEvent::UserJoined { session, user });
        }
        if let Some((connection, packet)) = ack {
            self.send_packet(connection, &packet);
        }
        true
    }

    // -- room events ------------------------------------------------------

    fn on_room_event(&mut self, room: RoomId, event: RoomEvent) -> bool {
        let Some(session) = self.sessions.find_by_room(room) else {
            debug!(%room, "room event for unknown room");
            return false;
        };
        match event {
            RoomEvent::MemberJoined(snapshot) => {
                match self.sessions.add_member(session, &snapshot, self.now) {
                    Ok(_) => {}
                    Err(SessionError::DuplicateMember { member, .. }) => {
                        warn!(%session, %member, "member joined twice, ignoring");
                    }
                    Err(err) => warn!(%session, error = %err, "could not add member"),
                }
            }
            RoomEvent::MemberLeft(member) => self.on_member_left(session, member),
            RoomEvent::OwnerChanged { previous, new } => self.on_owner_changed(session, previous, new),
            RoomEvent::Kicked { reason } | RoomEvent::Destroyed { reason } => {
                self.teardown_session(session, reason);
            }
            RoomEvent::MemberDataUpdated { member, mut data } => {
                data.truncate(MEMBER_USER_DATA_LEN);
                let Ok(s) = self.sessions.get_mut(session) else {
                    return false;
                };
                let events_started = s.flags.user_data_events_started;
                let Some(m) = s.member_mut(member) else {
                    debug!(%session, %member, "data update for unknown member");
                    return true;
                };
                m.user_data = data;
                let user = SessionUser::from(&*m);
                if events_started {
                    self.emit(LobbyEvent::UserUpdated { session, user });
                }
            }
        }
        true
    }

    fn on_member_left(&mut self, session: SessionHandle, member: MemberId) {
        let removed = match self.sessions.remove_member(session, member) {
            Ok(Some(removed)) => removed,
            Ok(None) => return,
            Err(err) => {
                warn!(%session, %member, error = %err, "could not remove member");
                return;
            }
        };
        let Some(connection) = removed.connection else {
            return;
        };
        self.transport.free(connection);
        let events_started = self
            .sessions
            .get(session)
            .is_ok_and(|s| s.flags.user_data_events_started);
        if events_started {
            self.emit(LobbyEvent::UserLeft {
                session,
                member,
                online_id: removed.online_id,
            });
        }
    }

    fn on_owner_changed(&mut self, session: SessionHandle, previous: MemberId, new: MemberId) {
        let migration_enabled = self.config.host_migration_enabled;
        if let Err(err) = self.sessions.change_owner(session, previous, new) {
            warn!(%session, %previous, %new, error = %err, "owner change for unknown member");
            return;
        }
        let Ok(s) = self.sessions.get_mut(session) else {
            return;
        };
        let Some(owner) = s.member(new) else {
            return;
        };
        if owner.is_me() {
            info!(%session, %previous, "we are the new owner");
            self.start_migration_server(session, previous);
            return;
        }

        let (active, addr) = (owner.signaling.is_active(), owner.addr);
        s.flags.host = false;
        info!(%session, %previous, %new, active, "room owner changed");
        if active && migration_enabled {
            s.migration.new_host_address_valid = true;
            self.emit(LobbyEvent::RoomOwnerChanged {
                session,
                owner: new,
                addr,
            });
        }
    }

    // -- packets ----------------------------------------------------------

    /// Feeds one packet received on `connection`. Returns `false` if it
    /// could not be decoded or routed.
    pub fn on_packet(&mut self, connection: ConnectionId, data: &[u8]) -> bool {
        self.now = Instant::now();
        let packet = match self.codec.decode(data) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(%connection, error = %err, "undecodable packet dropped");
                return false;
            }
        };
        let Some((session, sender)) = self.sessions.find_member_by_connection(connection) else {
            debug!(%connection, "packet from unknown connection dropped");
            return false;
        };
        let from = packet.from();
        let room = self.sessions.get(session).map(|s| s.room).unwrap_or_default();
        if from.member != sender || from.room != room {
            warn!(%session, %connection, claimed = %from, "packet sender mismatch, dropping");
            return false;
        }

        let enabled = self.config.host_migration_enabled;
        let now = self.now;
        let Ok(s) = self.sessions.get_mut(session) else {
            return false;
        };
        let sender_is_owner = s.member(sender).is_some_and(|m| m.owner);

        match packet {
            LobbyPacket::JoinSessionAck { web_session, .. } => {
                if !sender_is_owner {
                    debug!(%session, %sender, "join ack from non-owner ignored");
                    return true;
                }
                if let Some(m) = s.member_mut(sender) {
                    m.host_join_ack = true;
                }
                if s.web_session.is_none() {
                    s.web_session = web_session;
                }
                debug!(%session, %sender, "join acknowledged by host");
            }
            LobbyPacket::HostMigrationStart { .. } => {
                if !sender_is_owner {
                    debug!(%session, %sender, "migration start from non-owner ignored");
                    return true;
                }
                if !enabled || !s.create_flags.migratable || s.flags.started {
                    debug!(%session, "migration start declined");
                    return true;
                }
                if s.migration.begin(now) {
                    info!(%session, %sender, "host is migrating");
                    self.emit(LobbyEvent::HostMigrationStarted { session });
                }
            }
            LobbyPacket::HostMigrationServer { .. } => {
                if !sender_is_owner && !s.migration.is_migrating() {
                    debug!(%session, %sender, "migration server from non-owner ignored");
                    return true;
                }
                s.flags.host = false;
                let started = s.migration.begin(now);
                s.migration.finish_matchmaking();
                s.migration.new_host_address_valid = true;
                info!(%session, %sender, "new host announced itself");
                if started {
                    self.emit(LobbyEvent::HostMigrationStarted { session });
                }
            }
            LobbyPacket::HostHint { hint, .. } => {
                if !s.is_host() {
                    debug!(%session, %sender, "host hint while not host ignored");
                    return true;
                }
                if let Some(m) = s.member_mut(sender) {
                    m.host_hint = Some(hint);
                }
                debug!(%session, %sender, ?hint, "host hint received");
            }
        }
        true
    }
}
