//! The lobby: single-writer owner of every task and session.
//!
//! ```text
//!   API call ──► start task ──┐
//!                             ▼
//!   tick ─────► advance ──► issue request ──► platform
//!                             ▲                  │
//!   on_platform_event ──► correlate ◄────────────┘
//!                             │
//!   deliver_completions ◄── stop / fail
//!        │
//!        └──► end logic, then the caller's callback (exactly once)
//! ```
//!
//! Nothing in here blocks or awaits. [`LobbyService`](crate::LobbyService)
//! drives a lobby from a tokio task; tests drive one by hand.

use lobbyforge_protocol::{
    Codec, ConnectionUid, ForcedReason, JobId, JsonCodec, LobbyPacket, PlatformErrorCode,
    PlatformRequest, RequestId, RoomId, RoomSnapshot, WebJob,
};
use lobbyforge_session::{Session, SessionError, SessionHandle, SessionRegistry};
use lobbyforge_transport::{ConnectionId, ConnectionState, MemoryTransport, Transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::events::{LobbyEvent, SessionUser};
use crate::task::{Awaiting, Progress, Task, TaskId, TaskKind, TaskPool, TaskState};
use crate::user_data::UserDataLayout;
use crate::{LobbyConfig, LobbyError, MatchmakingPlatform};

/// Upper bound on local steps one task may take in a single tick.
const MAX_STEPS_PER_TICK: usize = 8;

/// A local user (controller index) taking part in an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LocalUser(pub u32);

/// Orchestrates sessions on top of a [`MatchmakingPlatform`] and a
/// [`Transport`].
///
/// Build one with [`Lobby::builder`].
pub struct Lobby {
    pub(crate) config: LobbyConfig,
    pub(crate) platform: Box<dyn MatchmakingPlatform>,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) codec: Box<dyn Codec>,
    pub(crate) sessions: SessionRegistry,
    pub(crate) tasks: TaskPool,
    pub(crate) user_data: UserDataLayout,
    pub(crate) rng: StdRng,
    pub(crate) now: Instant,
    events: mpsc::UnboundedSender<LobbyEvent>,
}

impl Lobby {
    pub fn builder() -> LobbyBuilder {
        LobbyBuilder::new()
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    /// # Errors
    /// [`LobbyError::InvalidSession`] for a stale handle.
    pub fn session(&self, session: SessionHandle) -> Result<&Session, LobbyError> {
        Ok(self.sessions.get(session)?)
    }

    pub fn sessions(&self) -> impl Iterator<Item = (SessionHandle, &Session)> {
        self.sessions.iter()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Tasks in flight, including stopped ones awaiting delivery.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_task_running(&self, id: TaskId) -> bool {
        self.tasks.get(id).is_some_and(Task::is_live)
    }

    /// Requests cancellation of a running task. The task fails with
    /// [`LobbyError::Cancelled`] at its next step boundary. Returns
    /// `false` if the task is not running.
    pub fn cancel_task(&mut self, id: TaskId) -> bool {
        let cancelled = self.tasks.cancel(id);
        if cancelled {
            info!(task = %id, "task cancellation requested");
        }
        cancelled
    }

    // -- scheduling -------------------------------------------------------

    /// One scheduler tick: signaling timeouts, migration upkeep, one round
    /// of task advancement, then delivery of whatever finished.
    pub fn tick(&mut self, now: Instant) {
        self.now = now;

        for timeout in self.sessions.update_signaling(now, self.config.signaling_timeout) {
            if let Some(connection) = timeout.connection {
                self.transport.set_state(connection, ConnectionState::NotConnected);
            }
        }
        self.update_migrations(now);

        for id in self.tasks.ids() {
            self.advance(id);
        }
        self.deliver_completions();
    }

    /// Finishes every stopped task: end logic, then the callback. Returns
    /// how many tasks were delivered.
    pub fn deliver_completions(&mut self) -> usize {
        let mut delivered = 0;
        while let Some((id, task)) = self.tasks.pop_completion() {
            self.finish(id, task);
            delivered += 1;
        }
        delivered
    }

    pub(crate) fn advance(&mut self, id: TaskId) {
        for _ in 0..MAX_STEPS_PER_TICK {
            let Some(task) = self.tasks.get(id) else {
                return;
            };
            if task.state != TaskState::Stopped
                && task.kind.awaiting() != Awaiting::Nothing
                && task.timer.exceeded(self.now, self.config.request_timeout)
            {
                let error = match task.state {
                    TaskState::Cancelling => LobbyError::Cancelled,
                    _ => LobbyError::TimedOut,
                };
                warn!(
                    task = %id,
                    kind = task.kind.name(),
                    awaiting = ?task.kind.awaiting(),
                    "no answer from platform"
                );
                self.tasks.fail(id, error);
                return;
            }
            match task.state {
                TaskState::Stopped => return,
                TaskState::Cancelling => {
                    if task.kind.awaiting() == Awaiting::Nothing {
                        self.tasks.fail(id, LobbyError::Cancelled);
                    }
                    return;
                }
                TaskState::Running => {}
            }
            if let Some(session) = task.session {
                if !self.sessions.contains(session) {
                    debug!(task = %id, %session, "session went away under task");
                    self.tasks.fail(id, LobbyError::InvalidSession);
                    return;
                }
            }

            let step: Option<fn(&mut Self, TaskId) -> Progress> = match &task.kind {
                TaskKind::Create(_) => Some(Self::advance_create),
                TaskKind::Join(_) => Some(Self::advance_join),
                TaskKind::Search(_) => Some(Self::advance_search),
                TaskKind::Update(_) => Some(Self::advance_update),
                TaskKind::Delete(_) => Some(Self::advance_delete),
                TaskKind::Query(_) => Some(Self::advance_query),
                TaskKind::SetLocalUserData(_) => Some(Self::advance_set_local_user_data),
                TaskKind::EnsureBestHost(_) => Some(Self::advance_ensure_best_host),
                TaskKind::SendHostHint(_) => Some(Self::advance_send_host_hint),
                TaskKind::MigrationServer(_) => Some(Self::advance_migration_server),
                TaskKind::SetAdvertisement(_) => Some(Self::advance_set_advertisement),
                TaskKind::GetAdvertisement(_) => Some(Self::advance_get_advertisement),
                TaskKind::GetUsers(_) | TaskKind::Immediate { .. } => None,
            };
            let Some(step) = step else {
                self.tasks.stop(id);
                return;
            };
            if step(self, id) == Progress::Wait {
                return;
            }
        }
    }

    fn finish(&mut self, id: TaskId, task: Task) {
        let Task {
            session,
            error,
            kind,
            ..
        } = task;
        let name = kind.name();
        let result = match error {
            None => {
                info!(task = %id, kind = name, "task finished");
                Ok(())
            }
            Some(err) => {
                info!(task = %id, kind = name, error = %err, "task failed");
                Err(err)
            }
        };

        match kind {
            TaskKind::Create(t) => self.finish_create(session, result, t),
            TaskKind::Join(t) => self.finish_join(session, result, t),
            TaskKind::Search(t) => self.finish_search(result, t),
            TaskKind::Update(t) => (t.callback)(result),
            TaskKind::Delete(t) => self.finish_delete(session, result, t),
            TaskKind::Query(t) => self.finish_query(session, result, t),
            TaskKind::GetUsers(callback) => self.finish_get_users(session, result, callback),
            TaskKind::SetLocalUserData(t) => (t.callback)(result),
            TaskKind::EnsureBestHost(t) => self.finish_ensure_best_host(session, result, t),
            TaskKind::SendHostHint(_) | TaskKind::MigrationServer(_) => {
                if let Err(err) = result {
                    warn!(task = %id, kind = name, error = %err, "background task failed");
                }
            }
            TaskKind::SetAdvertisement(t) => (t.callback)(result),
            TaskKind::GetAdvertisement(t) => (t.callback)(result.map(|()| t.data)),
            TaskKind::Immediate { callback, .. } => callback(result),
        }
    }

    pub(crate) fn start_task(
        &mut self,
        session: Option<SessionHandle>,
        kind: TaskKind,
    ) -> Result<TaskId, LobbyError> {
        let name = kind.name();
        let id = self.tasks.insert(Task::new(session, kind, self.now))?;
        match session {
            Some(session) => info!(task = %id, kind = name, %session, "task started"),
            None => info!(task = %id, kind = name, "task started"),
        }
        Ok(id)
    }

    /// Starts a task whose work is already done; only delivery remains.
    pub(crate) fn start_immediate(
        &mut self,
        session: Option<SessionHandle>,
        name: &'static str,
        callback: crate::Callback<()>,
    ) -> Result<TaskId, LobbyError> {
        let id = self.start_task(session, TaskKind::Immediate { name, callback })?;
        self.tasks.stop(id);
        Ok(id)
    }

    // -- platform helpers -------------------------------------------------

    /// Issues a request on behalf of task `id`. A rejected request fails
    /// the task and returns `None`.
    pub(crate) fn issue(&mut self, id: TaskId, request: PlatformRequest) -> Option<RequestId> {
        let kind = request.kind();
        match self.platform.issue(request) {
            Ok(request) => {
                debug!(task = %id, ?kind, %request, "request issued");
                self.restart_timer(id);
                Some(request)
            }
            Err(code) => {
                warn!(task = %id, ?kind, %code, "request rejected");
                self.tasks.fail(
                    id,
                    LobbyError::from_platform(code).unwrap_or(LobbyError::InternalError),
                );
                None
            }
        }
    }

    /// Starts the answer deadline of task `id` over from the current clock
    /// sample.
    fn restart_timer(&mut self, id: TaskId) {
        let now = self.now;
        if let Some(task) = self.tasks.get_mut(id) {
            task.timer.restart(now);
        }
    }

    /// Issues a request nobody waits for.
    pub(crate) fn issue_untracked(&mut self, request: PlatformRequest) {
        let kind = request.kind();
        if let Err(code) = self.platform.issue(request) {
            warn!(?kind, %code, "untracked request rejected");
        }
    }

    pub(crate) fn add_job(&mut self, id: TaskId, job: WebJob) -> Option<JobId> {
        match self.platform.add_job(job) {
            Ok(job) => {
                debug!(task = %id, %job, "web job queued");
                self.restart_timer(id);
                Some(job)
            }
            Err(code) => {
                warn!(task = %id, %code, "web job rejected");
                self.tasks.fail(
                    id,
                    LobbyError::from_platform(code).unwrap_or(LobbyError::InternalError),
                );
                None
            }
        }
    }

    /// Default handling of an error result: room codes fail the task
    /// locally, anything else takes the fatal path.
    pub(crate) fn fail_platform(&mut self, id: TaskId, code: PlatformErrorCode) {
        match LobbyError::from_platform(code) {
            Some(err) => {
                self.tasks.fail(id, err);
            }
            None => {
                error!(task = %id, %code, "platform error");
                self.tasks.fail(id, LobbyError::InternalError);
                self.fatal(code);
            }
        }
    }

    /// Fails every task and tears down every session.
    pub(crate) fn fatal(&mut self, code: PlatformErrorCode) {
        error!(%code, tasks = self.tasks.len(), sessions = self.sessions.len(), "fatal platform error");
        for id in self.tasks.ids() {
            self.tasks.fail(id, LobbyError::InternalError);
        }
        for session in self.sessions.handles() {
            self.teardown_session(session, ForcedReason::ServerInternalError);
        }
    }

    // -- session helpers --------------------------------------------------

    /// Copies a room snapshot into `session`. Duplicate members are
    /// logged and skipped.
    pub(crate) fn bind_room(
        &mut self,
        session: SessionHandle,
        snapshot: &RoomSnapshot,
    ) -> Result<(), LobbyError> {
        let s = self.sessions.get_mut(session)?;
        s.room = snapshot.room;
        s.world = snapshot.world;
        s.server = snapshot.server;
        s.create_flags.game_flags = snapshot.game_flags;

        for member in &snapshot.members {
            match self.sessions.add_member(session, member, self.now) {
                Ok(_) => {}
                Err(SessionError::DuplicateMember { room, member }) => {
                    warn!(%session, %room, %member, "duplicate member in snapshot, skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }
        info!(%session, room = %snapshot.room, world = %snapshot.world, members = snapshot.members.len(), "room bound");
        Ok(())
    }

    /// Frees `session` and its connections. With `leave_room`, the room
    /// is left on the platform without waiting for the answer.
    pub(crate) fn release_session(&mut self, session: SessionHandle, leave_room: bool) {
        self.terminate_migration(session);
        let Ok(mut s) = self.sessions.free(session) else {
            return;
        };
        for member in s.clear_members() {
            if let Some(connection) = member.connection {
                self.transport.free(connection);
            }
        }
        if leave_room && s.room != RoomId::default() {
            self.issue_untracked(PlatformRequest::LeaveRoom { room: s.room });
        }
        info!(%session, room = %s.room, "session freed");
    }

    /// The room went away under us: free the session, tell the
    /// application, fail the tasks that used it.
    pub(crate) fn teardown_session(&mut self, session: SessionHandle, reason: ForcedReason) {
        if !self.sessions.contains(session) {
            return;
        }
        warn!(%session, %reason, "forced from room");
        for id in self.tasks.on_session(session) {
            self.tasks.fail(id, LobbyError::InvalidSession);
        }
        self.release_session(session, true);
        self.emit(LobbyEvent::ForcedFromRoom { session, reason });
    }

    /// Reports the local user and every connected member, then lets live
    /// user events flow.
    pub(crate) fn start_user_data_events(&mut self, session: SessionHandle) {
        let Ok(s) = self.sessions.get_mut(session) else {
            return;
        };
        s.flags.user_data_events_started = true;
        let users: Vec<SessionUser> = s
            .me()
            .into_iter()
            .chain(s.connected_members())
            .map(SessionUser::from)
            .collect();
        for user in users {
            self.emit(LobbyEvent::UserJoined { session, user });
        }
    }

    pub(crate) fn local_uid(&self, session: SessionHandle) -> Option<ConnectionUid> {
        self.sessions.get(session).ok().and_then(|s| s.local)
    }

    // -- transport helpers ------------------------------------------------

    pub(crate) fn send_packet(&mut self, connection: ConnectionId, packet: &LobbyPacket) {
        let data = match self.codec.encode(packet) {
            Ok(data) => data,
            Err(err) => {
                warn!(%connection, error = %err, "packet encode failed");
                return;
            }
        };
        if let Err(err) = self.transport.send(connection, &data) {
            warn!(%connection, error = %err, "packet send failed");
        }
    }

    /// Sends `packet` to every member with an established connection.
    /// Returns how many members it went to.
    pub(crate) fn broadcast(&mut self, session: SessionHandle, packet: &LobbyPacket) -> usize {
        let Ok(s) = self.sessions.get(session) else {
            return 0;
        };
        let targets: Vec<ConnectionId> = s
            .connected_members()
            .filter_map(|m| m.connection)
            .filter(|&c| self.transport.connection_state(c) == Some(ConnectionState::Connected))
            .collect();
        for &connection in &targets {
            self.send_packet(connection, packet);
        }
        targets.len()
    }

    pub(crate) fn emit(&self, event: LobbyEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// Assembles a [`Lobby`].
///
/// The platform is required. The transport defaults to a
/// [`MemoryTransport`], the codec to [`JsonCodec`].
///
/// ```rust,ignore
/// let (mut lobby, events) = Lobby::builder()
///     .config(LobbyConfig::default())
///     .platform(my_platform)
///     .transport(my_transport)
///     .build()?;
/// ```
pub struct LobbyBuilder {
    config: LobbyConfig,
    platform: Option<Box<dyn MatchmakingPlatform>>,
    transport: Option<Box<dyn Transport>>,
    codec: Option<Box<dyn Codec>>,
    seed: Option<u64>,
}

impl LobbyBuilder {
    pub fn new() -> Self {
        Self {
            config: LobbyConfig::default(),
            platform: None,
            transport: None,
            codec: None,
            seed: None,
        }
    }

    pub fn config(mut self, config: LobbyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn platform(mut self, platform: impl MatchmakingPlatform) -> Self {
        self.platform = Some(Box::new(platform));
        self
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn codec(mut self, codec: impl Codec) -> Self {
        self.codec = Some(Box::new(codec));
        self
    }

    /// Seeds the world-selection jitter, for reproducible runs.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds the lobby and returns it with the receiving end of its
    /// event channel.
    ///
    /// # Errors
    /// [`LobbyError::InvalidParam`] if no platform was given.
    pub fn build(self) -> Result<(Lobby, mpsc::UnboundedReceiver<LobbyEvent>), LobbyError> {
        let platform = self.platform.ok_or(LobbyError::InvalidParam)?;
        let config = self.config.validated();
        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let (events, events_rx) = mpsc::unbounded_channel();

        info!(
            server = %config.server,
            max_tasks = config.max_tasks,
            max_sessions = config.max_sessions,
            "lobby created"
        );

        let lobby = Lobby {
            sessions: SessionRegistry::new(config.registry()),
            tasks: TaskPool::new(config.max_tasks),
            platform,
            transport: self
                .transport
                .unwrap_or_else(|| Box::new(MemoryTransport::new()) as Box<dyn Transport>),
            codec: self
                .codec
                .unwrap_or_else(|| Box::new(JsonCodec) as Box<dyn Codec>),
            user_data: UserDataLayout::default(),
            rng: StdRng::seed_from_u64(seed),
            now: Instant::now(),
            events,
            config,
        };
        Ok((lobby, events_rx))
    }
}

impl Default for LobbyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
