//! Verbs on an existing session: update, delete, query, users, local user
//! data, advertisement data, and the immediate start/end/migrate/register
//! operations.

use lobbyforge_protocol::{
    JobId, MEMBER_USER_DATA_LEN, PlatformErrorCode, PlatformRequest, PlatformResponse, RequestId,
    RequestKind, RoomAttributes, RoomId, RoomSummary, SessionId, SessionUserData,
    UserDataDescriptor, WebJob, WebJobResponse, WebSessionId,
};
use lobbyforge_session::{CreateFlags, SessionHandle};
use lobbyforge_transport::ConnectionState;
use tracing::{debug, info, warn};

use crate::events::SessionUser;
use crate::task::{Awaiting, JobStep, Progress, RequestStep, TaskKind};
use crate::user_data::UserDataLayout;
use crate::{Callback, Lobby, LobbyError, StreamCallback, Streamed, TaskId};

/// Externally visible state of a session's room, from
/// [`Lobby::session_query`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoomDetails {
    pub id: SessionId,
    pub summary: RoomSummary,
    pub user_data: Vec<SessionUserData>,
}

pub(crate) struct UpdateTask {
    pub(crate) step: RequestStep,
    attributes: RoomAttributes,
    pub(crate) callback: Callback<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeleteStep {
    LeaveRoom,
    AwaitLeave(RequestId),
    LeaveWebSession,
    AwaitWebSession(JobId),
}

pub(crate) struct DeleteTask {
    step: DeleteStep,
    callback: Callback<()>,
}

impl DeleteTask {
    pub(crate) fn awaiting(&self) -> Awaiting {
        match self.step {
            DeleteStep::AwaitLeave(id) => Awaiting::Request(RequestKind::LeaveRoom, id),
            DeleteStep::AwaitWebSession(id) => Awaiting::Job(id),
            DeleteStep::LeaveRoom | DeleteStep::LeaveWebSession => Awaiting::Nothing,
        }
    }
}

pub(crate) struct QueryTask {
    pub(crate) step: RequestStep,
    rooms: Vec<RoomSummary>,
    callback: StreamCallback<RoomDetails>,
}

pub(crate) struct SetLocalUserDataTask {
    pub(crate) step: RequestStep,
    data: Vec<u8>,
    pub(crate) callback: Callback<()>,
}

pub(crate) struct SetAdvertisementTask {
    pub(crate) step: JobStep,
    data: Vec<u8>,
    pub(crate) callback: Callback<()>,
}

pub(crate) struct GetAdvertisementTask {
    pub(crate) step: JobStep,
    web_session: WebSessionId,
    pub(crate) data: Vec<u8>,
    pub(crate) callback: Callback<Vec<u8>>,
}

impl Lobby {
    fn host_session_room(&self, session: SessionHandle) -> Result<RoomId, LobbyError> {
        let s = self.sessions.get(session)?;
        if !s.is_host() {
            return Err(LobbyError::InvalidRequest);
        }
        Ok(s.room)
    }

    fn task_session_room(&self, id: TaskId) -> Option<RoomId> {
        let session = self.tasks.get(id)?.session?;
        self.sessions.get(session).ok().map(|s| s.room)
    }

    // -- update -----------------------------------------------------------

    /// Replaces the session data of a session we host.
    ///
    /// # Errors
    /// - [`LobbyError::InvalidSession`] for a stale handle.
    /// - [`LobbyError::InvalidRequest`] if we are not the host.
    /// - [`LobbyError::UserDataNotRegistered`] for unregistered data.
    pub fn session_update(
        &mut self,
        session: SessionHandle,
        data: &[SessionUserData],
        callback: impl FnOnce(Result<(), LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        self.host_session_room(session)?;
        let attributes = self.user_data.encode(data)?;
        let task = UpdateTask {
            step: RequestStep::Issue,
            attributes,
            callback: Box::new(callback),
        };
        self.start_task(Some(session), TaskKind::Update(task))
    }

    pub(crate) fn advance_update(&mut self, id: TaskId) -> Progress {
        let Some(room) = self.task_session_room(id) else {
            return Progress::Wait;
        };
        let Some(TaskKind::Update(t)) = self.tasks.kind_mut(id) else {
            return Progress::Wait;
        };
        if t.step != RequestStep::Issue {
            return Progress::Wait;
        }
        let request = PlatformRequest::SetRoomDataExternal {
            room,
            attributes: t.attributes.clone(),
        };
        if let Some(request) = self.issue(id, request) {
            if let Some(TaskKind::Update(t)) = self.tasks.kind_mut(id) {
                t.step = RequestStep::Awaiting(request);
            }
        }
        Progress::Wait
    }

    /// Completion of a request whose only payload is
    /// [`PlatformResponse::Done`].
    pub(crate) fn on_done_response(
        &mut self,
        id: TaskId,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        match result {
            Ok(PlatformResponse::Done) => {
                self.tasks.stop(id);
            }
            Ok(other) => {
                warn!(task = %id, response = ?other, "unexpected response");
                self.tasks.fail(id, LobbyError::InternalError);
            }
            Err(code) => self.fail_platform(id, code),
        }
    }

    // -- delete -----------------------------------------------------------

    /// Leaves the room (and its web session) and frees the session. The
    /// session is freed whatever the platform answers.
    ///
    /// # Errors
    /// [`LobbyError::InvalidSession`] for a stale handle.
    pub fn session_delete(
        &mut self,
        session: SessionHandle,
        callback: impl FnOnce(Result<(), LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        self.sessions.get(session)?;
        let task = DeleteTask {
            step: DeleteStep::LeaveRoom,
            callback: Box::new(callback),
        };
        self.start_task(Some(session), TaskKind::Delete(task))
    }

    fn set_delete_step(&mut self, id: TaskId, step: DeleteStep) {
        if let Some(TaskKind::Delete(t)) = self.tasks.kind_mut(id) {
            t.step = step;
        }
    }

    pub(crate) fn advance_delete(&mut self, id: TaskId) -> Progress {
        let Some(TaskKind::Delete(t)) = self.tasks.kind_mut(id) else {
            return Progress::Wait;
        };
        let step = t.step;
        let Some(session) = self.tasks.get(id).and_then(|t| t.session) else {
            return Progress::Wait;
        };
        let Ok(s) = self.sessions.get(session) else {
            return Progress::Wait;
        };
        let (room, web_session) = (s.room, s.web_session.clone());

        match step {
            DeleteStep::LeaveRoom if room == RoomId::default() => {
                self.set_delete_step(id, DeleteStep::LeaveWebSession);
                Progress::Continue
            }
            DeleteStep::LeaveRoom => {
                if let Some(request) = self.issue(id, PlatformRequest::LeaveRoom { room }) {
                    self.set_delete_step(id, DeleteStep::AwaitLeave(request));
                }
                Progress::Wait
            }
            DeleteStep::LeaveWebSession => {
                match web_session {
                    Some(web_session) => {
                        let job = WebJob::LeaveSession {
                            session: web_session,
                        };
                        if let Some(job) = self.add_job(id, job) {
                            self.set_delete_step(id, DeleteStep::AwaitWebSession(job));
                        }
                    }
                    None => {
                        self.tasks.stop(id);
                    }
                }
                Progress::Wait
            }
            DeleteStep::AwaitLeave(_) | DeleteStep::AwaitWebSession(_) => Progress::Wait,
        }
    }

    pub(crate) fn on_delete_response(
        &mut self,
        id: TaskId,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        match result {
            Ok(PlatformResponse::Done) => self.set_delete_step(id, DeleteStep::LeaveWebSession),
            Err(PlatformErrorCode::RoomNotFound) => {
                debug!(task = %id, "room already gone");
                self.set_delete_step(id, DeleteStep::LeaveWebSession);
            }
            Ok(other) => {
                warn!(task = %id, response = ?other, "unexpected response to leave");
                self.tasks.fail(id, LobbyError::InternalError);
            }
            Err(code) => self.fail_platform(id, code),
        }
    }

    /// The web session leave never fails the delete.
    pub(crate) fn on_delete_job(
        &mut self,
        id: TaskId,
        result: Result<WebJobResponse, PlatformErrorCode>,
    ) {
        if let Err(code) = result {
            warn!(task = %id, %code, "leaving web session failed");
        }
        self.tasks.stop(id);
    }

    pub(crate) fn finish_delete(
        &mut self,
        session: Option<SessionHandle>,
        result: Result<(), LobbyError>,
        task: DeleteTask,
    ) {
        if let Some(session) = session {
            self.release_session(session, false);
        }
        (task.callback)(result);
    }

    // -- query ------------------------------------------------------------

    /// Fetches the externally visible state of the session's room.
    ///
    /// # Errors
    /// [`LobbyError::InvalidSession`] for a stale handle.
    pub fn session_query(
        &mut self,
        session: SessionHandle,
        callback: impl FnMut(Streamed<RoomDetails>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        self.sessions.get(session)?;
        let task = QueryTask {
            step: RequestStep::Issue,
            rooms: Vec::new(),
            callback: Box::new(callback),
        };
        self.start_task(Some(session), TaskKind::Query(task))
    }

    pub(crate) fn advance_query(&mut self, id: TaskId) -> Progress {
        let Some(room) = self.task_session_room(id) else {
            return Progress::Wait;
        };
        match self.tasks.kind_mut(id) {
            Some(TaskKind::Query(t)) if t.step == RequestStep::Issue => {}
            _ => return Progress::Wait,
        }
        let request = PlatformRequest::GetRoomDataExternalList { rooms: vec![room] };
        if let Some(request) = self.issue(id, request) {
            if let Some(TaskKind::Query(t)) = self.tasks.kind_mut(id) {
                t.step = RequestStep::Awaiting(request);
            }
        }
        Progress::Wait
    }

    pub(crate) fn on_query_response(
        &mut self,
        id: TaskId,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        match result {
            Ok(PlatformResponse::RoomDataList(rooms)) => {
                if let Some(TaskKind::Query(t)) = self.tasks.kind_mut(id) {
                    t.rooms = rooms;
                }
                self.tasks.stop(id);
            }
            Ok(other) => {
                warn!(task = %id, response = ?other, "unexpected response to query");
                self.tasks.fail(id, LobbyError::InternalError);
            }
            Err(code) => self.fail_platform(id, code),
        }
    }

    pub(crate) fn finish_query(
        &mut self,
        session: Option<SessionHandle>,
        result: Result<(), LobbyError>,
        task: QueryTask,
    ) {
        let QueryTask {
            rooms,
            mut callback,
            ..
        } = task;
        if result.is_ok() {
            let (game_type, web_session) = session
                .and_then(|h| self.sessions.get(h).ok())
                .map(|s| (s.game_type, s.web_session.clone()))
                .unwrap_or_default();
            for summary in rooms {
                let mut id =
                    SessionId::new(summary.world, summary.room, summary.server, game_type);
                id.web_session = web_session.clone();
                let user_data = self.user_data.decode(&summary.attributes);
                callback(Streamed::Item(RoomDetails {
                    id,
                    summary,
                    user_data,
                }));
            }
        }
        callback(Streamed::Done(result));
    }

    // -- users ------------------------------------------------------------

    /// Lists the local user, then every remote member with an established
    /// connection.
    ///
    /// # Errors
    /// [`LobbyError::InvalidSession`] for a stale handle.
    pub fn session_get_users(
        &mut self,
        session: SessionHandle,
        callback: impl FnMut(Streamed<SessionUser>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        self.sessions.get(session)?;
        self.start_task(Some(session), TaskKind::GetUsers(Box::new(callback)))
    }

    pub(crate) fn finish_get_users(
        &mut self,
        session: Option<SessionHandle>,
        result: Result<(), LobbyError>,
        mut callback: StreamCallback<SessionUser>,
    ) {
        if let Err(err) = result {
            callback(Streamed::Done(Err(err)));
            return;
        }
        let Some(s) = session.and_then(|h| self.sessions.get(h).ok()) else {
            callback(Streamed::Done(Err(LobbyError::InvalidSession)));
            return;
        };
        let users: Vec<SessionUser> = s
            .me()
            .into_iter()
            .chain(s.connected_members().filter(|m| {
                m.signaling.is_active()
                    && m.connection.and_then(|c| self.transport.connection_state(c))
                        == Some(ConnectionState::Connected)
            }))
            .map(SessionUser::from)
            .collect();
        for user in users {
            callback(Streamed::Item(user));
        }
        callback(Streamed::Done(Ok(())));
    }

    // -- local user data --------------------------------------------------

    /// Publishes the local member's user data blob to the room.
    ///
    /// # Errors
    /// - [`LobbyError::OutOfUserData`] if `data` exceeds
    ///   [`MEMBER_USER_DATA_LEN`] bytes.
    /// - [`LobbyError::InvalidSession`] for a stale handle.
    pub fn session_set_local_user_data(
        &mut self,
        session: SessionHandle,
        data: Vec<u8>,
        callback: impl FnOnce(Result<(), LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        if data.len() > MEMBER_USER_DATA_LEN {
            return Err(LobbyError::OutOfUserData);
        }
        self.sessions.get(session)?;
        let task = SetLocalUserDataTask {
            step: RequestStep::Issue,
            data,
            callback: Box::new(callback),
        };
        self.start_task(Some(session), TaskKind::SetLocalUserData(task))
    }

    pub(crate) fn advance_set_local_user_data(&mut self, id: TaskId) -> Progress {
        let Some(room) = self.task_session_room(id) else {
            return Progress::Wait;
        };
        let data = match self.tasks.kind_mut(id) {
            Some(TaskKind::SetLocalUserData(t)) if t.step == RequestStep::Issue => t.data.clone(),
            _ => return Progress::Wait,
        };
        let request = PlatformRequest::SetRoomMemberDataInternal { room, data };
        if let Some(request) = self.issue(id, request) {
            if let Some(TaskKind::SetLocalUserData(t)) = self.tasks.kind_mut(id) {
                t.step = RequestStep::Awaiting(request);
            }
        }
        Progress::Wait
    }

    pub(crate) fn on_set_local_user_data_response(
        &mut self,
        id: TaskId,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        if matches!(result, Ok(PlatformResponse::Done)) {
            let session = self.tasks.get(id).and_then(|t| t.session);
            let data = match self.tasks.kind_mut(id) {
                Some(TaskKind::SetLocalUserData(t)) => t.data.clone(),
                _ => return,
            };
            if let Some(s) = session.and_then(|h| self.sessions.get_mut(h).ok()) {
                let me = s.me().map(|m| m.id);
                if let Some(member) = me.and_then(|id| s.member_mut(id)) {
                    member.user_data = data;
                }
            }
        }
        self.on_done_response(id, result);
    }

    // -- advertisement ----------------------------------------------------

    /// Stores `data` as the advertisement of the session's web session.
    ///
    /// # Errors
    /// - [`LobbyError::InvalidParam`] if `data` exceeds the configured cap.
    /// - [`LobbyError::InvalidSession`] for a stale handle or a session
    ///   without a web session.
    pub fn session_set_advertisement_data(
        &mut self,
        session: SessionHandle,
        data: Vec<u8>,
        callback: impl FnOnce(Result<(), LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        if data.len() > self.config.max_advertisement_len {
            return Err(LobbyError::InvalidParam);
        }
        if self.sessions.get(session)?.web_session.is_none() {
            return Err(LobbyError::InvalidSession);
        }
        let task = SetAdvertisementTask {
            step: JobStep::Issue,
            data,
            callback: Box::new(callback),
        };
        self.start_task(Some(session), TaskKind::SetAdvertisement(task))
    }

    pub(crate) fn advance_set_advertisement(&mut self, id: TaskId) -> Progress {
        let web_session = self
            .tasks
            .get(id)
            .and_then(|t| t.session)
            .and_then(|h| self.sessions.get(h).ok())
            .and_then(|s| s.web_session.clone());
        let Some(web_session) = web_session else {
            self.tasks.fail(id, LobbyError::InvalidSession);
            return Progress::Wait;
        };
        let data = match self.tasks.kind_mut(id) {
            Some(TaskKind::SetAdvertisement(t)) if t.step == JobStep::Issue => t.data.clone(),
            _ => return Progress::Wait,
        };
        let job = WebJob::UpdateAdvertisement {
            session: web_session,
            data,
        };
        if let Some(job) = self.add_job(id, job) {
            if let Some(TaskKind::SetAdvertisement(t)) = self.tasks.kind_mut(id) {
                t.step = JobStep::Awaiting(job);
            }
        }
        Progress::Wait
    }

    /// Reads the advertisement of the web session named in `id`.
    ///
    /// # Errors
    /// [`LobbyError::InvalidSession`] if `id` carries no web session.
    pub fn session_get_advertisement_data(
        &mut self,
        id: &SessionId,
        callback: impl FnOnce(Result<Vec<u8>, LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        let web_session = id.web_session.clone().ok_or(LobbyError::InvalidSession)?;
        let task = GetAdvertisementTask {
            step: JobStep::Issue,
            web_session,
            data: Vec::new(),
            callback: Box::new(callback),
        };
        self.start_task(None, TaskKind::GetAdvertisement(task))
    }

    pub(crate) fn advance_get_advertisement(&mut self, id: TaskId) -> Progress {
        let web_session = match self.tasks.kind_mut(id) {
            Some(TaskKind::GetAdvertisement(t)) if t.step == JobStep::Issue => {
                t.web_session.clone()
            }
            _ => return Progress::Wait,
        };
        if let Some(job) = self.add_job(id, WebJob::GetAdvertisement { session: web_session }) {
            if let Some(TaskKind::GetAdvertisement(t)) = self.tasks.kind_mut(id) {
                t.step = JobStep::Awaiting(job);
            }
        }
        Progress::Wait
    }

    pub(crate) fn on_advertisement_job(
        &mut self,
        id: TaskId,
        result: Result<WebJobResponse, PlatformErrorCode>,
    ) {
        match result {
            Ok(WebJobResponse::Advertisement(data)) => {
                if let Some(TaskKind::GetAdvertisement(t)) = self.tasks.kind_mut(id) {
                    t.data = data;
                }
                self.tasks.stop(id);
            }
            Ok(WebJobResponse::Done) => {
                self.tasks.stop(id);
            }
            Ok(other) => {
                warn!(task = %id, response = ?other, "unexpected advertisement response");
                self.tasks.fail(id, LobbyError::InternalError);
            }
            Err(code) => self.fail_platform(id, code),
        }
    }

    // -- immediate verbs --------------------------------------------------

    /// Marks the game as in progress. Started sessions never migrate.
    ///
    /// # Errors
    /// [`LobbyError::InvalidSession`] for a stale handle.
    pub fn session_start(
        &mut self,
        session: SessionHandle,
        callback: impl FnOnce(Result<(), LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        self.set_started(session, true, "start", Box::new(callback))
    }

    /// # Errors
    /// [`LobbyError::InvalidSession`] for a stale handle.
    pub fn session_end(
        &mut self,
        session: SessionHandle,
        callback: impl FnOnce(Result<(), LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        self.set_started(session, false, "end", Box::new(callback))
    }

    fn set_started(
        &mut self,
        session: SessionHandle,
        started: bool,
        name: &'static str,
        callback: Callback<()>,
    ) -> Result<TaskId, LobbyError> {
        self.sessions.get(session)?;
        let id = self.start_immediate(Some(session), name, callback)?;
        self.sessions.get_mut(session)?.flags.started = started;
        info!(%session, started, "session state changed");
        Ok(id)
    }

    /// Replaces the flags the session was created with.
    ///
    /// # Errors
    /// [`LobbyError::InvalidSession`] for a stale handle.
    pub fn session_migrate(
        &mut self,
        session: SessionHandle,
        flags: CreateFlags,
        callback: impl FnOnce(Result<(), LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        self.sessions.get(session)?;
        let id = self.start_immediate(Some(session), "migrate", Box::new(callback))?;
        self.sessions.get_mut(session)?.create_flags = flags;
        info!(%session, ?flags, "session flags replaced");
        Ok(id)
    }

    /// Registers the game's session data items. Replaces any earlier
    /// registration.
    ///
    /// # Errors
    /// - [`LobbyError::InvalidParam`] if an id is registered twice.
    /// - [`LobbyError::OutOfSessionUserData`] if the items do not fit.
    pub fn session_register_user_data(
        &mut self,
        descriptors: &[UserDataDescriptor],
        callback: impl FnOnce(Result<(), LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        let layout = UserDataLayout::new(descriptors)?;
        let id = self.start_immediate(None, "register_user_data", Box::new(callback))?;
        self.user_data = layout;
        debug!(items = descriptors.len(), "session user data registered");
        Ok(id)
    }
}
