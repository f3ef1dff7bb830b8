//! Joining a session found by search or received in an invite.
//!
//! ```text
//! JoinRoom → AwaitRoom → AwaitSignaling ──► done
//!                             │
//!                 (invitable) └► JoinWebSession → AwaitWebSession
//! ```
//!
//! Signaling counts as complete once the owner is reachable and, because
//! we are a joining client, has acknowledged us with a `JoinSessionAck`.

use std::net::SocketAddr;

use lobbyforge_protocol::{
    JobId, PlatformErrorCode, PlatformRequest, PlatformResponse, RequestId, RequestKind, RoomId,
    SessionId, WebJob, WebJobResponse,
};
use lobbyforge_session::{CreateFlags, SessionHandle, SignalingStatus};
use tracing::{debug, info, warn};

use crate::task::{Awaiting, Progress, TaskKind};
use crate::{Callback, Lobby, LobbyError, LocalUser, TaskId};

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionJoined {
    pub session: SessionHandle,
    /// Where the room owner can be reached.
    pub host_addr: SocketAddr,
    pub id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinStep {
    JoinRoom,
    AwaitRoom(RequestId),
    AwaitSignaling,
    JoinWebSession,
    AwaitWebSession(JobId),
}

pub(crate) struct JoinTask {
    pub(crate) step: JoinStep,
    room: RoomId,
    callback: Callback<SessionJoined>,
}

impl JoinTask {
    pub(crate) fn awaiting(&self) -> Awaiting {
        match self.step {
            JoinStep::AwaitRoom(id) => Awaiting::Request(RequestKind::JoinRoom, id),
            JoinStep::AwaitWebSession(id) => Awaiting::Job(id),
            _ => Awaiting::Nothing,
        }
    }
}

impl Lobby {
    /// Joins the room named by `id`.
    ///
    /// # Errors
    /// - [`LobbyError::InvalidParam`] without users.
    /// - [`LobbyError::InvalidSession`] for the all-zero id.
    /// - [`LobbyError::IllegalSessionJoin`] if we are already in that room.
    /// - [`LobbyError::OutOfMemory`] if every session slot is used.
    /// - [`LobbyError::TooManyTasks`] if the task pool is full.
    pub fn session_join(
        &mut self,
        users: &[LocalUser],
        flags: CreateFlags,
        id: &SessionId,
        callback: impl FnOnce(Result<SessionJoined, LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        if users.is_empty() {
            return Err(LobbyError::InvalidParam);
        }
        if !id.is_valid() {
            return Err(LobbyError::InvalidSession);
        }
        if let Some(existing) = self.sessions.find_by_room(id.room) {
            warn!(session = %existing, room = %id.room, "already in room");
            return Err(LobbyError::IllegalSessionJoin);
        }

        let session = self.sessions.create_session(false)?;
        {
            let s = self.sessions.get_mut(session)?;
            s.world = id.world;
            s.server = id.server;
            s.game_type = id.game_type;
            s.web_session = id.web_session.clone();
            s.create_flags = flags;
        }

        let task = JoinTask {
            step: JoinStep::JoinRoom,
            room: id.room,
            callback: Box::new(callback),
        };
        match self.start_task(Some(session), TaskKind::Join(task)) {
            Ok(task) => Ok(task),
            Err(err) => {
                self.release_session(session, false);
                Err(err)
            }
        }
    }

    fn join_task(&mut self, id: TaskId) -> Option<&mut JoinTask> {
        match self.tasks.kind_mut(id)? {
            TaskKind::Join(t) => Some(t),
            _ => None,
        }
    }

    fn set_join_step(&mut self, id: TaskId, step: JoinStep) {
        if let Some(t) = self.join_task(id) {
            t.step = step;
        }
    }

    pub(crate) fn advance_join(&mut self, id: TaskId) -> Progress {
        let Some((step, room)) = self.join_task(id).map(|t| (t.step, t.room)) else {
            return Progress::Wait;
        };
        let Some(session) = self.tasks.get(id).and_then(|t| t.session) else {
            return Progress::Wait;
        };

        match step {
            JoinStep::JoinRoom => {
                if let Some(request) = self.issue(id, PlatformRequest::JoinRoom { room }) {
                    self.set_join_step(id, JoinStep::AwaitRoom(request));
                }
                Progress::Wait
            }
            JoinStep::AwaitSignaling => {
                let (status, invitable) = match self.sessions.get(session) {
                    Ok(s) => (s.check_signaling(), s.create_flags.invitable),
                    Err(err) => {
                        self.tasks.fail(id, err.into());
                        return Progress::Wait;
                    }
                };
                match status {
                    SignalingStatus::Active if invitable => {
                        self.set_join_step(id, JoinStep::JoinWebSession);
                        Progress::Continue
                    }
                    SignalingStatus::Active => {
                        self.tasks.stop(id);
                        Progress::Wait
                    }
                    SignalingStatus::Pending => Progress::Wait,
                    SignalingStatus::Dead => {
                        self.tasks.fail(id, LobbyError::ConnectionFailed);
                        Progress::Wait
                    }
                    SignalingStatus::None => {
                        self.tasks.fail(id, LobbyError::InvalidParam);
                        Progress::Wait
                    }
                }
            }
            JoinStep::JoinWebSession => {
                let web_session = self
                    .sessions
                    .get(session)
                    .ok()
                    .and_then(|s| s.web_session.clone());
                let Some(web_session) = web_session else {
                    warn!(%session, "invitable session has no web session id");
                    self.tasks.fail(id, LobbyError::InvalidParam);
                    return Progress::Wait;
                };
                if let Some(job) = self.add_job(id, WebJob::JoinSession { session: web_session }) {
                    self.set_join_step(id, JoinStep::AwaitWebSession(job));
                }
                Progress::Wait
            }
            JoinStep::AwaitRoom(_) | JoinStep::AwaitWebSession(_) => Progress::Wait,
        }
    }

    pub(crate) fn on_join_response(
        &mut self,
        id: TaskId,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        let Some(session) = self.tasks.get(id).and_then(|t| t.session) else {
            return;
        };
        match result {
            Ok(PlatformResponse::RoomJoined(snapshot)) => {
                if let Err(err) = self.bind_room(session, &snapshot) {
                    self.tasks.fail(id, err);
                    return;
                }
                if let Ok(s) = self.sessions.get_mut(session) {
                    s.require_host_ack = s.owner().is_some_and(|owner| owner.is_other());
                    debug!(%session, require_host_ack = s.require_host_ack, "room joined");
                }
                self.set_join_step(id, JoinStep::AwaitSignaling);
            }
            Ok(other) => {
                warn!(task = %id, response = ?other, "unexpected response to join");
                self.tasks.fail(id, LobbyError::InternalError);
            }
            Err(code) => self.fail_platform(id, code),
        }
    }

    pub(crate) fn on_join_job(
        &mut self,
        id: TaskId,
        result: Result<WebJobResponse, PlatformErrorCode>,
    ) {
        match result {
            Ok(WebJobResponse::Done) => {
                self.tasks.stop(id);
            }
            Ok(other) => {
                warn!(task = %id, response = ?other, "unexpected web job response to join");
                self.tasks.fail(id, LobbyError::InternalError);
            }
            Err(code) => self.fail_platform(id, code),
        }
    }

    pub(crate) fn finish_join(
        &mut self,
        session: Option<SessionHandle>,
        result: Result<(), LobbyError>,
        task: JoinTask,
    ) {
        let Some(session) = session else {
            (task.callback)(result.and(Err(LobbyError::InternalError)));
            return;
        };
        let outcome = result.and_then(|()| {
            let s = self.sessions.get(session)?;
            let host_addr = s
                .owner()
                .filter(|owner| owner.is_other())
                .and_then(|owner| owner.addr)
                .ok_or(LobbyError::ConnectionFailed)?;
            Ok(SessionJoined {
                session,
                host_addr,
                id: s.session_id(),
            })
        });
        match outcome {
            Ok(joined) => {
                if let Ok(s) = self.sessions.get_mut(session) {
                    s.flags.can_send_host_hints = s.create_flags.migratable;
                    s.require_host_ack = false;
                }
                info!(%session, host = %joined.host_addr, "session joined");
                (task.callback)(Ok(joined));
                self.start_user_data_events(session);
            }
            Err(err) => {
                self.release_session(session, true);
                (task.callback)(Err(err));
            }
        }
    }
}
