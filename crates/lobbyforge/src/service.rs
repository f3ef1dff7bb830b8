//! The lobby as a tokio task.
//!
//! [`LobbyService::run`] owns the [`Lobby`] and is its only writer. Three
//! sources feed it:
//!
//! - commands from [`LobbyHandle`]s (bounded channel, one reply per call),
//! - inbound platform events and packets from [`InboundSender`]s
//!   (unbounded, so platform callback threads never block),
//! - the [`TickScheduler`].
//!
//! Completions are delivered after every command, every inbound batch and
//! every tick.

use std::sync::{Arc, Mutex, PoisonError};

use lobbyforge_protocol::{
    HostHint, PlatformEvent, SessionId, SessionUserData, UserDataDescriptor,
};
use lobbyforge_session::{CreateFlags, SessionHandle};
use lobbyforge_tick::{TickConfig, TickScheduler};
use lobbyforge_transport::ConnectionId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    CreateParams, Lobby, LobbyError, LocalUser, RoomDetails, SearchParams, SearchResult,
    SessionCreated, SessionJoined, SessionUser, Streamed, TaskId,
};

/// Capacity of the command channel. Callers wait when it is full.
const COMMAND_CHANNEL_SIZE: usize = 64;

/// Something that happened outside the lobby and must be fed into it.
#[derive(Debug, Clone)]
pub enum Inbound {
    Platform(PlatformEvent),
    /// A lobby packet received from a peer.
    Packet { from: ConnectionId, data: Vec<u8> },
}

/// Pushes inbound items to a running [`LobbyService`]. Never blocks, so
/// it is safe to call from platform callback threads.
#[derive(Debug, Clone)]
pub struct InboundSender(mpsc::UnboundedSender<Inbound>);

impl InboundSender {
    /// # Errors
    /// [`LobbyError::ServiceUnavailable`] once the service has stopped.
    pub fn platform_event(&self, event: PlatformEvent) -> Result<(), LobbyError> {
        self.send(Inbound::Platform(event))
    }

    /// # Errors
    /// [`LobbyError::ServiceUnavailable`] once the service has stopped.
    pub fn packet(&self, from: ConnectionId, data: Vec<u8>) -> Result<(), LobbyError> {
        self.send(Inbound::Packet { from, data })
    }

    fn send(&self, inbound: Inbound) -> Result<(), LobbyError> {
        self.0
            .send(inbound)
            .map_err(|_| LobbyError::ServiceUnavailable)
    }
}

enum ServiceCommand {
    Apply(Box<dyn FnOnce(&mut Lobby) + Send>),
    Shutdown,
}

/// Runs a [`Lobby`] on the current tokio runtime.
pub struct LobbyService {
    lobby: Lobby,
    scheduler: TickScheduler,
    commands: mpsc::Receiver<ServiceCommand>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl LobbyService {
    pub fn new(lobby: Lobby, tick: TickConfig) -> (Self, LobbyHandle, InboundSender) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let service = Self {
            lobby,
            scheduler: TickScheduler::new(tick),
            commands: command_rx,
            inbound: inbound_rx,
        };
        (
            service,
            LobbyHandle { sender: command_tx },
            InboundSender(inbound_tx),
        )
    }

    /// Spawns [`run`](Self::run) as a tokio task.
    pub fn spawn(
        lobby: Lobby,
        tick: TickConfig,
    ) -> (JoinHandle<Lobby>, LobbyHandle, InboundSender) {
        let (service, handle, inbound) = Self::new(lobby, tick);
        (tokio::spawn(service.run()), handle, inbound)
    }

    /// Serves until [`LobbyHandle::shutdown`] or until every handle is
    /// dropped, then gives the lobby back.
    pub async fn run(mut self) -> Lobby {
        info!(
            tick_rate_hz = self.scheduler.tick_rate_hz(),
            "lobby service started"
        );

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ServiceCommand::Apply(apply)) => {
                        apply(&mut self.lobby);
                        self.lobby.deliver_completions();
                    }
                    Some(ServiceCommand::Shutdown) | None => break,
                },
                Some(inbound) = self.inbound.recv() => {
                    let mut batch = 1;
                    self.lobby.on_inbound(inbound);
                    while let Ok(inbound) = self.inbound.try_recv() {
                        self.lobby.on_inbound(inbound);
                        batch += 1;
                    }
                    let delivered = self.lobby.deliver_completions();
                    debug!(batch, delivered, "inbound batch processed");
                }
                tick = self.scheduler.wait_for_tick() => {
                    self.lobby.tick(tick.now);
                    self.scheduler.record_tick_end();
                }
            }
        }

        info!(
            tasks = self.lobby.task_count(),
            sessions = self.lobby.session_count(),
            "lobby service stopped"
        );
        self.lobby
    }
}

/// One-shot reply slot shared between a task's callback and the start
/// error path. Whichever fires first wins.
struct Reply<T>(Arc<Mutex<Option<oneshot::Sender<Result<T, LobbyError>>>>>);

impl<T> Clone for Reply<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Reply<T> {
    fn new(sender: oneshot::Sender<Result<T, LobbyError>>) -> Self {
        Self(Arc::new(Mutex::new(Some(sender))))
    }

    fn send(&self, result: Result<T, LobbyError>) {
        let sender = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    }
}

/// Collects a streamed task into one reply.
fn collect<T: Send + 'static>(reply: Reply<Vec<T>>) -> impl FnMut(Streamed<T>) + Send + 'static {
    let mut items = Vec::new();
    move |streamed| match streamed {
        Streamed::Item(item) => items.push(item),
        Streamed::Done(result) => reply.send(result.map(|()| std::mem::take(&mut items))),
    }
}

/// Async front end of a running [`LobbyService`].
///
/// Cheap to clone: it's just an `mpsc::Sender` wrapper. Every method
/// resolves once the underlying task has completed.
#[derive(Clone)]
pub struct LobbyHandle {
    sender: mpsc::Sender<ServiceCommand>,
}

impl LobbyHandle {
    async fn apply(&self, apply: impl FnOnce(&mut Lobby) + Send + 'static) -> Result<(), LobbyError> {
        self.sender
            .send(ServiceCommand::Apply(Box::new(apply)))
            .await
            .map_err(|_| LobbyError::ServiceUnavailable)
    }

    /// Runs `f` on the lobby and returns its result.
    async fn with_lobby<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Lobby) -> T + Send + 'static,
    ) -> Result<T, LobbyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.apply(move |lobby| {
            let _ = reply_tx.send(f(lobby));
        })
        .await?;
        reply_rx.await.map_err(|_| LobbyError::ServiceUnavailable)
    }

    /// Starts a task and waits for its callback.
    async fn run_task<T: Send + 'static>(
        &self,
        start: impl FnOnce(&mut Lobby, Reply<T>) -> Result<TaskId, LobbyError> + Send + 'static,
    ) -> Result<T, LobbyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let reply = Reply::new(reply_tx);
        let on_start_error = reply.clone();
        self.apply(move |lobby| {
            if let Err(err) = start(lobby, reply) {
                on_start_error.send(Err(err));
            }
        })
        .await?;
        reply_rx.await.map_err(|_| LobbyError::ServiceUnavailable)?
    }

    pub async fn create_session(
        &self,
        users: Vec<LocalUser>,
        params: CreateParams,
    ) -> Result<SessionCreated, LobbyError> {
        self.run_task(move |lobby, reply| {
            lobby.session_create(&users, params, move |r| reply.send(r))
        })
        .await
    }

    pub async fn join_session(
        &self,
        users: Vec<LocalUser>,
        flags: CreateFlags,
        id: SessionId,
    ) -> Result<SessionJoined, LobbyError> {
        self.run_task(move |lobby, reply| {
            lobby.session_join(&users, flags, &id, move |r| reply.send(r))
        })
        .await
    }

    pub async fn search(
        &self,
        user: LocalUser,
        params: SearchParams,
    ) -> Result<Vec<SearchResult>, LobbyError> {
        self.run_task(move |lobby, reply| lobby.session_search(user, params, collect(reply)))
            .await
    }

    pub async fn update_session(
        &self,
        session: SessionHandle,
        data: Vec<SessionUserData>,
    ) -> Result<(), LobbyError> {
        self.run_task(move |lobby, reply| {
            lobby.session_update(session, &data, move |r| reply.send(r))
        })
        .await
    }

    pub async fn delete_session(&self, session: SessionHandle) -> Result<(), LobbyError> {
        self.run_task(move |lobby, reply| lobby.session_delete(session, move |r| reply.send(r)))
            .await
    }

    pub async fn query_session(
        &self,
        session: SessionHandle,
    ) -> Result<Vec<RoomDetails>, LobbyError> {
        self.run_task(move |lobby, reply| lobby.session_query(session, collect(reply)))
            .await
    }

    pub async fn get_users(&self, session: SessionHandle) -> Result<Vec<SessionUser>, LobbyError> {
        self.run_task(move |lobby, reply| lobby.session_get_users(session, collect(reply)))
            .await
    }

    pub async fn set_local_user_data(
        &self,
        session: SessionHandle,
        data: Vec<u8>,
    ) -> Result<(), LobbyError> {
        self.run_task(move |lobby, reply| {
            lobby.session_set_local_user_data(session, data, move |r| reply.send(r))
        })
        .await
    }

    pub async fn ensure_best_host(&self, session: SessionHandle) -> Result<(), LobbyError> {
        self.run_task(move |lobby, reply| {
            lobby.session_ensure_best_host(session, move |r| reply.send(r))
        })
        .await
    }

    /// Fire-and-forget: resolves once the push is queued.
    pub async fn send_host_hint(&self, session: SessionHandle) -> Result<(), LobbyError> {
        self.with_lobby(move |lobby| lobby.session_send_host_hint(session))
            .await?
    }

    pub async fn set_local_host_hint(
        &self,
        session: SessionHandle,
        hint: HostHint,
    ) -> Result<(), LobbyError> {
        self.with_lobby(move |lobby| lobby.set_local_host_hint(session, hint))
            .await?
    }

    pub async fn start_session(&self, session: SessionHandle) -> Result<(), LobbyError> {
        self.run_task(move |lobby, reply| lobby.session_start(session, move |r| reply.send(r)))
            .await
    }

    pub async fn end_session(&self, session: SessionHandle) -> Result<(), LobbyError> {
        self.run_task(move |lobby, reply| lobby.session_end(session, move |r| reply.send(r)))
            .await
    }

    pub async fn migrate_session(
        &self,
        session: SessionHandle,
        flags: CreateFlags,
    ) -> Result<(), LobbyError> {
        self.run_task(move |lobby, reply| {
            lobby.session_migrate(session, flags, move |r| reply.send(r))
        })
        .await
    }

    pub async fn set_advertisement_data(
        &self,
        session: SessionHandle,
        data: Vec<u8>,
    ) -> Result<(), LobbyError> {
        self.run_task(move |lobby, reply| {
            lobby.session_set_advertisement_data(session, data, move |r| reply.send(r))
        })
        .await
    }

    pub async fn get_advertisement_data(&self, id: SessionId) -> Result<Vec<u8>, LobbyError> {
        self.run_task(move |lobby, reply| {
            lobby.session_get_advertisement_data(&id, move |r| reply.send(r))
        })
        .await
    }

    pub async fn register_user_data(
        &self,
        descriptors: Vec<UserDataDescriptor>,
    ) -> Result<(), LobbyError> {
        self.run_task(move |lobby, reply| {
            lobby.session_register_user_data(&descriptors, move |r| reply.send(r))
        })
        .await
    }

    /// The shareable id of a session, e.g. for an invite.
    pub async fn session_id(&self, session: SessionHandle) -> Result<SessionId, LobbyError> {
        self.with_lobby(move |lobby| lobby.session(session).map(|s| s.session_id()))
            .await?
    }

    pub async fn cancel_task(&self, task: TaskId) -> Result<bool, LobbyError> {
        self.with_lobby(move |lobby| lobby.cancel_task(task)).await
    }

    /// Stops the service. Tasks still in flight are dropped without their
    /// callbacks firing.
    pub async fn shutdown(&self) -> Result<(), LobbyError> {
        self.sender
            .send(ServiceCommand::Shutdown)
            .await
            .map_err(|_| LobbyError::ServiceUnavailable)
    }
}
