//! Host migration coordinator.
//!
//! ```text
//!            ensure_best_host / HostMigrationStart / owner changed
//! [Idle] ───────────────────────────────────────────────────────► [Migrating]
//!   ▲                                                                 │
//!   │  matchmaking finished (next tick), timeout, or termination      │
//!   └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The old host hands the room over with `GrantRoomOwner` after telling
//! every peer to expect a migration. Whoever the platform names owner then
//! runs a [`MigrationServerTask`] that announces itself with
//! `HostMigrationServer`. Clients follow the owner-changed event or that
//! packet, whichever comes first.

use lobbyforge_protocol::{
    HostHint, LobbyPacket, MemberId, PlatformErrorCode, PlatformRequest, PlatformResponse,
    RequestId, RequestKind,
};
use lobbyforge_session::SessionHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::LobbyEvent;
use crate::task::{Awaiting, Progress, RequestStep, TaskKind};
use crate::{Callback, Lobby, LobbyError, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnsureStep {
    Evaluate,
    AwaitGrant(RequestId),
}

pub(crate) struct EnsureBestHostTask {
    step: EnsureStep,
    callback: Callback<()>,
}

impl EnsureBestHostTask {
    pub(crate) fn awaiting(&self) -> Awaiting {
        match self.step {
            EnsureStep::AwaitGrant(id) => Awaiting::Request(RequestKind::GrantRoomOwner, id),
            EnsureStep::Evaluate => Awaiting::Nothing,
        }
    }
}

/// Pushes the owner-privilege ranking to the platform.
pub(crate) struct HostHintTask {
    pub(crate) step: RequestStep,
    /// Another push was asked for while this one was in flight.
    resend: bool,
}

/// Run by the member that just became owner.
pub(crate) struct MigrationServerTask {
    previous: MemberId,
}

impl Lobby {
    /// Hands the room to a better host if a connected member's hint
    /// outranks ours. Completes without action when nobody does, or when
    /// the game has started.
    ///
    /// # Errors
    /// - [`LobbyError::InvalidSession`] for a stale handle.
    /// - [`LobbyError::InvalidRequest`] if we are not the host.
    pub fn session_ensure_best_host(
        &mut self,
        session: SessionHandle,
        callback: impl FnOnce(Result<(), LobbyError>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        if !self.sessions.get(session)?.is_host() {
            return Err(LobbyError::InvalidRequest);
        }
        let task = EnsureBestHostTask {
            step: EnsureStep::Evaluate,
            callback: Box::new(callback),
        };
        self.start_task(Some(session), TaskKind::EnsureBestHost(task))
    }

    pub(crate) fn advance_ensure_best_host(&mut self, id: TaskId) -> Progress {
        match self.tasks.kind_mut(id) {
            Some(TaskKind::EnsureBestHost(t)) if t.step == EnsureStep::Evaluate => {}
            _ => return Progress::Wait,
        }
        let Some(session) = self.tasks.get(id).and_then(|t| t.session) else {
            return Progress::Wait;
        };
        let enabled = self.config.host_migration_enabled;
        let now = self.now;
        let Ok(s) = self.sessions.get_mut(session) else {
            return Progress::Wait;
        };

        if s.flags.started || s.migration.is_migrating() {
            debug!(%session, started = s.flags.started, "best host check skipped");
            self.tasks.stop(id);
            return Progress::Wait;
        }
        let Some((candidate, hint)) = s.best_host_candidate() else {
            self.tasks.stop(id);
            return Progress::Wait;
        };
        if !hint.outranks(&s.local_hint) {
            debug!(%session, %candidate, "local peer is still the best host");
            self.tasks.stop(id);
            return Progress::Wait;
        }
        if !enabled || !s.create_flags.migratable {
            self.tasks.fail(id, LobbyError::SessionNotMigratable);
            return Progress::Wait;
        }
        let Some(from) = s.local else {
            self.tasks.fail(id, LobbyError::InvalidSession);
            return Progress::Wait;
        };

        s.migration.begin(now);
        s.migration.task = Some(id.key());
        s.flags.host = false;
        let room = s.room;
        info!(%session, %room, %candidate, "handing room to better host");

        let sent = self.broadcast(session, &LobbyPacket::HostMigrationStart { from });
        debug!(%session, peers = sent, "migration start broadcast");
        self.emit(LobbyEvent::HostMigrationStarted { session });

        let request = PlatformRequest::GrantRoomOwner {
            room,
            new_owner: candidate,
        };
        if let Some(request) = self.issue(id, request) {
            if let Some(TaskKind::EnsureBestHost(t)) = self.tasks.kind_mut(id) {
                t.step = EnsureStep::AwaitGrant(request);
            }
        }
        Progress::Wait
    }

    pub(crate) fn finish_ensure_best_host(
        &mut self,
        session: Option<SessionHandle>,
        result: Result<(), LobbyError>,
        task: EnsureBestHostTask,
    ) {
        if result.is_err() {
            if let Some(session) = session {
                self.terminate_migration(session);
            }
        }
        (task.callback)(result);
    }

    // -- host hints -------------------------------------------------------

    /// Pushes the current owner-privilege ranking to the platform, so it
    /// promotes the best member if we drop. A push requested while one is
    /// in flight is sent once more when that one completes.
    ///
    /// # Errors
    /// - [`LobbyError::InvalidSession`] for a stale handle.
    /// - [`LobbyError::InvalidRequest`] if we are not the host.
    /// - [`LobbyError::TooManyTasks`] if the task pool is full.
    pub fn session_send_host_hint(&mut self, session: SessionHandle) -> Result<(), LobbyError> {
        if !self.sessions.get(session)?.is_host() {
            return Err(LobbyError::InvalidRequest);
        }
        let running = self.tasks.find(|t| {
            t.session == Some(session) && matches!(t.kind, TaskKind::SendHostHint(_))
        });
        if let Some(id) = running {
            if let Some(TaskKind::SendHostHint(t)) = self.tasks.kind_mut(id) {
                t.resend = true;
            }
            return Ok(());
        }
        let task = HostHintTask {
            step: RequestStep::Issue,
            resend: false,
        };
        self.start_task(Some(session), TaskKind::SendHostHint(task))?;
        Ok(())
    }

    pub(crate) fn advance_send_host_hint(&mut self, id: TaskId) -> Progress {
        match self.tasks.kind_mut(id) {
            Some(TaskKind::SendHostHint(t)) if t.step == RequestStep::Issue => {}
            _ => return Progress::Wait,
        }
        let Some(s) = self
            .tasks
            .get(id)
            .and_then(|t| t.session)
            .and_then(|h| self.sessions.get(h).ok())
        else {
            return Progress::Wait;
        };
        let request = PlatformRequest::SetRoomDataInternal {
            room: s.room,
            owner_privilege_rank: s.owner_privilege_rank(),
        };
        if let Some(request) = self.issue(id, request) {
            if let Some(TaskKind::SendHostHint(t)) = self.tasks.kind_mut(id) {
                t.step = RequestStep::Awaiting(request);
            }
        }
        Progress::Wait
    }

    pub(crate) fn on_host_hint_response(
        &mut self,
        id: TaskId,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        if let (Ok(PlatformResponse::Done), Some(TaskKind::SendHostHint(t))) =
            (&result, self.tasks.kind_mut(id))
        {
            if t.resend {
                t.resend = false;
                t.step = RequestStep::Issue;
                return;
            }
        }
        self.on_done_response(id, result);
    }

    /// Records the local peer's host quality. A host re-pushes its
    /// ranking; a client reports the hint to its host.
    ///
    /// # Errors
    /// [`LobbyError::InvalidSession`] for a stale handle.
    pub fn set_local_host_hint(
        &mut self,
        session: SessionHandle,
        hint: HostHint,
    ) -> Result<(), LobbyError> {
        let s = self.sessions.get_mut(session)?;
        s.local_hint = hint;
        if s.is_host() {
            return self.session_send_host_hint(session);
        }
        if !s.flags.can_send_host_hints {
            return Ok(());
        }
        let target = s.owner().filter(|o| o.is_other()).and_then(|o| o.connection);
        if let (Some(connection), Some(from)) = (target, s.local) {
            debug!(%session, %connection, "sending host hint to owner");
            self.send_packet(connection, &LobbyPacket::HostHint { from, hint });
        }
        Ok(())
    }

    // -- new owner --------------------------------------------------------

    /// The platform made us owner.
    pub(crate) fn start_migration_server(&mut self, session: SessionHandle, previous: MemberId) {
        let task = MigrationServerTask { previous };
        if let Err(err) = self.start_task(Some(session), TaskKind::MigrationServer(task)) {
            warn!(%session, error = %err, "could not start migration server task");
        }
    }

    pub(crate) fn advance_migration_server(&mut self, id: TaskId) -> Progress {
        let previous = match self.tasks.kind_mut(id) {
            Some(TaskKind::MigrationServer(t)) => t.previous,
            _ => return Progress::Wait,
        };
        let Some(session) = self.tasks.get(id).and_then(|t| t.session) else {
            return Progress::Wait;
        };
        let now = self.now;
        let Ok(s) = self.sessions.get_mut(session) else {
            return Progress::Wait;
        };

        s.flags.host = true;
        let started = s.migration.begin(now);
        s.migration.task = Some(id.key());
        s.migration.finish_matchmaking();
        s.migration.session_migrated = true;
        let Some(from) = s.local else {
            self.tasks.fail(id, LobbyError::InvalidSession);
            return Progress::Wait;
        };
        if started {
            self.emit(LobbyEvent::HostMigrationStarted { session });
        }

        let sent = self.broadcast(session, &LobbyPacket::HostMigrationServer { from });
        info!(%session, %previous, peers = sent, "took over as host");
        self.tasks.stop(id);
        Progress::Wait
    }

    // -- upkeep -----------------------------------------------------------

    /// Per-tick: settle finished migrations, end stuck ones.
    pub(crate) fn update_migrations(&mut self, now: Instant) {
        let limit = self.config.host_migration_timeout;
        for session in self.sessions.handles() {
            let Ok(s) = self.sessions.get_mut(session) else {
                continue;
            };
            if s.migration.is_finished() {
                s.migration.reset();
                info!(%session, host = s.is_host(), "host migration finished");
                self.emit(LobbyEvent::HostMigrationFinished { session });
            } else if s.migration.timed_out(now, limit) {
                warn!(%session, "host migration timed out");
                self.terminate_migration(session);
                self.emit(LobbyEvent::HostMigrationFinished { session });
            }
        }
    }

    /// Abandons any migration in flight on `session`: back to `Idle`, host
    /// flag restored from the owner flags, migration task cancelled.
    pub(crate) fn terminate_migration(&mut self, session: SessionHandle) {
        let Ok(s) = self.sessions.get_mut(session) else {
            return;
        };
        if !s.migration.is_migrating() && s.migration.task.is_none() {
            return;
        }
        let task = s.migration.reset();
        s.flags.host = s.owner().is_some_and(|o| o.is_me());
        debug!(%session, host = s.flags.host, "host migration terminated");
        if let Some(key) = task {
            self.cancel_task(TaskId::from_key(key));
        }
    }
}
