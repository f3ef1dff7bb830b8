//! Session creation.
//!
//! ```text
//! ListWorlds → AwaitWorlds → CreateRoom → AwaitRoom → AwaitSignaling
//!                                                        │
//!                          (invitable) CreateWebSession ◄┘
//!                                      → AwaitWebSession
//! ```

use lobbyforge_protocol::{
    JobId, PlatformErrorCode, PlatformRequest, PlatformResponse, RequestId, RequestKind, RoomAttributes,
    RoomCreateParams, SessionId, SessionUserData, WebJob, WebJobResponse, WorldId,
};
use lobbyforge_session::{CreateFlags, SessionHandle, SignalingStatus};
use lobbyforge_world::{WorldPurpose, rank_worlds};
use tracing::{info, warn};

use crate::task::{Awaiting, Progress, TaskKind};
use crate::{Callback, Lobby, LobbyError, LocalUser, TaskId};

/// What to create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateParams {
    pub public_slots: u32,
    pub private_slots: u32,
    pub flags: CreateFlags,
    /// Game-defined tag carried in the session id.
    pub game_type: u16,
    /// Initial session data. Every item must be registered.
    pub data: Vec<SessionUserData>,
}

impl Default for CreateParams {
    fn default() -> Self {
        Self {
            public_slots: 4,
            private_slots: 0,
            flags: CreateFlags::default(),
            game_type: 0,
            data: Vec::new(),
        }
    }
}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCreated {
    pub session: SessionHandle,
    /// Shareable id of the new session.
    pub id: SessionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CreateStep {
    ListWorlds,
    AwaitWorlds(RequestId),
    CreateRoom(WorldId),
    AwaitRoom(RequestId),
    AwaitSignaling,
    CreateWebSession,
    AwaitWebSession(JobId),
}

pub(crate) struct CreateTask {
    pub(crate) step: CreateStep,
    slots: (u32, u32),
    attributes: RoomAttributes,
    callback: Callback<SessionCreated>,
}

impl CreateTask {
    pub(crate) fn awaiting(&self) -> Awaiting {
        match self.step {
            CreateStep::AwaitWorlds(id) => Awaiting::Request(RequestKind::GetWorldInfoList, id),
            CreateStep::AwaitRoom(id) => Awaiting::Request(RequestKind::CreateJoinRoom, id),
            CreateStep::AwaitWebSession(id) => Awaiting::Job(id),
            _ => Awaiting::Nothing,
        }
    }
}

impl Lobby {
    /// Creates a room on the least busy world and becomes its host.
    ///
    /// # Errors
    /// - [`LobbyError::InvalidParam`] without users.
    /// - [`LobbyError::UserDataNotRegistered`] for unregistered data.
    /// - [`LobbyError::OutOfMemory`] if every session slot is used.
    /// - [`LobbyError::TooManyTasks`] if the task pool is full.
    pub fn session_create(
        &mut self,
        users: &[LocalUser],
        params: CreateParams,
        callback: impl FnOnce(Result<SessionCreated, LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        if users.is_empty() {
            return Err(LobbyError::InvalidParam);
        }
        let attributes = self.user_data.encode(&params.data)?;
        let session = self.sessions.create_session(true)?;
        {
            let s = self.sessions.get_mut(session)?;
            s.create_flags = params.flags;
            s.game_type = params.game_type;
        }

        let task = CreateTask {
            step: CreateStep::ListWorlds,
            slots: (params.public_slots, params.private_slots),
            attributes,
            callback: Box::new(callback),
        };
        match self.start_task(Some(session), TaskKind::Create(task)) {
            Ok(id) => Ok(id),
            Err(err) => {
                self.release_session(session, false);
                Err(err)
            }
        }
    }

    fn create_task(&mut self, id: TaskId) -> Option<&mut CreateTask> {
        match self.tasks.kind_mut(id)? {
            TaskKind::Create(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn advance_create(&mut self, id: TaskId) -> Progress {
        let Some(step) = self.create_task(id).map(|t| t.step) else {
            return Progress::Wait;
        };
        let Some(session) = self.tasks.get(id).and_then(|t| t.session) else {
            return Progress::Wait;
        };

        match step {
            CreateStep::ListWorlds => {
                let request = PlatformRequest::GetWorldInfoList {
                    server: self.config.server,
                };
                if let Some(request) = self.issue(id, request) {
                    self.set_create_step(id, CreateStep::AwaitWorlds(request));
                }
                Progress::Wait
            }
            CreateStep::CreateRoom(world) => {
                let Ok(flags) = self.sessions.get(session).map(|s| s.create_flags) else {
                    return Progress::Wait;
                };
                let auto_grant_owner = flags.migratable && self.config.host_migration_enabled;
                let Some(t) = self.create_task(id) else {
                    return Progress::Wait;
                };
                let params = RoomCreateParams {
                    world,
                    public_slots: t.slots.0,
                    private_slots: t.slots.1,
                    hidden: !flags.searchable,
                    auto_grant_owner,
                    game_flags: flags.game_flags,
                    attributes: t.attributes.clone(),
                };
                if let Some(request) = self.issue(id, PlatformRequest::CreateJoinRoom(params)) {
                    self.set_create_step(id, CreateStep::AwaitRoom(request));
                }
                Progress::Wait
            }
            CreateStep::AwaitSignaling => match self.sessions.get(session).map(|s| s.check_signaling()) {
                Ok(SignalingStatus::Active) => {
                    let invitable = self
                        .sessions
                        .get(session)
                        .is_ok_and(|s| s.create_flags.invitable);
                    if invitable {
                        self.set_create_step(id, CreateStep::CreateWebSession);
                        Progress::Continue
                    } else {
                        self.tasks.stop(id);
                        Progress::Wait
                    }
                }
                Ok(SignalingStatus::Pending) => Progress::Wait,
                Ok(SignalingStatus::Dead) => {
                    self.tasks.fail(id, LobbyError::ConnectionFailed);
                    Progress::Wait
                }
                Ok(SignalingStatus::None) => {
                    self.tasks.fail(id, LobbyError::InvalidParam);
                    Progress::Wait
                }
                Err(err) => {
                    self.tasks.fail(id, err.into());
                    Progress::Wait
                }
            },
            CreateStep::CreateWebSession => {
                let Some((public, private)) = self.create_task(id).map(|t| t.slots) else {
                    return Progress::Wait;
                };
                let Ok(room) = self.sessions.get(session).map(|s| s.room) else {
                    return Progress::Wait;
                };
                let max_slots = public + private;
                if let Some(job) = self.add_job(id, WebJob::CreateSession { room, max_slots }) {
                    self.set_create_step(id, CreateStep::AwaitWebSession(job));
                }
                Progress::Wait
            }
            CreateStep::AwaitWorlds(_) | CreateStep::AwaitRoom(_) | CreateStep::AwaitWebSession(_) => {
                Progress::Wait
            }
        }
    }

    fn set_create_step(&mut self, id: TaskId, step: CreateStep) {
        if let Some(t) = self.create_task(id) {
            t.step = step;
        }
    }

    pub(crate) fn on_create_response(
        &mut self,
        id: TaskId,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        let Some(session) = self.tasks.get(id).and_then(|t| t.session) else {
            return;
        };
        match result {
            Ok(PlatformResponse::WorldInfoList(worlds)) => {
                let ranked = rank_worlds(
                    &worlds,
                    WorldPurpose::Create,
                    &self.config.scoring,
                    &mut self.rng,
                );
                match ranked.map(|r| r.first().copied()) {
                    Ok(Some(world)) => {
                        info!(task = %id, %world, "world chosen for new room");
                        self.set_create_step(id, CreateStep::CreateRoom(world));
                    }
                    Ok(None) => {
                        self.tasks.fail(id, LobbyError::WorldNotDefined);
                    }
                    Err(err) => {
                        self.tasks.fail(id, err.into());
                    }
                }
            }
            Ok(PlatformResponse::RoomCreated(snapshot)) => match self.bind_room(session, &snapshot) {
                Ok(()) => self.set_create_step(id, CreateStep::AwaitSignaling),
                Err(err) => {
                    self.tasks.fail(id, err);
                }
            },
            Ok(other) => {
                warn!(task = %id, response = ?other, "unexpected response to create");
                self.tasks.fail(id, LobbyError::InternalError);
            }
            Err(code) => self.fail_platform(id, code),
        }
    }

    pub(crate) fn on_create_job(
        &mut self,
        id: TaskId,
        result: Result<WebJobResponse, PlatformErrorCode>,
    ) {
        let Some(session) = self.tasks.get(id).and_then(|t| t.session) else {
            return;
        };
        match result {
            Ok(WebJobResponse::SessionCreated(web_session)) => {
                if let Ok(s) = self.sessions.get_mut(session) {
                    info!(%session, %web_session, "web session created");
                    s.web_session = Some(web_session);
                }
                self.tasks.stop(id);
            }
            Ok(other) => {
                warn!(task = %id, response = ?other, "unexpected web job response to create");
                self.tasks.fail(id, LobbyError::InternalError);
            }
            Err(code) => self.fail_platform(id, code),
        }
    }

    pub(crate) fn finish_create(
        &mut self,
        session: Option<SessionHandle>,
        result: Result<(), LobbyError>,
        task: CreateTask,
    ) {
        let Some(session) = session else {
            (task.callback)(result.and(Err(LobbyError::InternalError)));
            return;
        };
        let outcome = result.and_then(|()| {
            let s = self.sessions.get(session)?;
            Ok(SessionCreated {
                session,
                id: s.session_id(),
            })
        });
        match outcome {
            Ok(created) => {
                info!(%session, id = %created.id, "session created");
                (task.callback)(Ok(created));
                self.start_user_data_events(session);
            }
            Err(err) => {
                self.release_session(session, true);
                (task.callback)(Err(err));
            }
        }
    }
}
