//! The task pool: every lifecycle operation in flight.
//!
//! A task is created by an API call, advanced by the lobby tick, fed by
//! correlated platform responses and finally delivered: its end logic runs
//! and the caller's callback fires exactly once. Delivery is always
//! deferred to [`Lobby::deliver_completions`](crate::Lobby::deliver_completions),
//! never done from inside an event handler.

use std::collections::VecDeque;
use std::fmt;

use lobbyforge_protocol::{JobId, RequestId, RequestKind};
use lobbyforge_session::{SessionHandle, SlotArena, SlotKey};
use lobbyforge_tick::Stopwatch;
use tokio::time::Instant;

use crate::LobbyError;
use crate::create::CreateTask;
use crate::events::SessionUser;
use crate::join::JoinTask;
use crate::migration::{EnsureBestHostTask, HostHintTask, MigrationServerTask};
use crate::search::SearchTask;
use crate::session_ops::{
    DeleteTask, GetAdvertisementTask, QueryTask, SetAdvertisementTask, SetLocalUserDataTask,
    UpdateTask,
};

/// Generation-checked handle to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(SlotKey);

impl TaskId {
    pub(crate) fn from_key(key: SlotKey) -> Self {
        Self(key)
    }

    pub(crate) fn key(&self) -> SlotKey {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// One invocation of a streaming callback.
#[derive(Debug)]
pub enum Streamed<T> {
    Item(T),
    /// Final invocation. Nothing follows it.
    Done(Result<(), LobbyError>),
}

/// Completion callback of a single-result task.
pub type Callback<T> = Box<dyn FnOnce(Result<T, LobbyError>) + Send>;

/// Callback of a task that reports a list: once per item, then
/// [`Streamed::Done`].
pub type StreamCallback<T> = Box<dyn FnMut(Streamed<T>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Running,
    /// Cancellation requested. Fails at the next step boundary.
    Cancelling,
    /// Waiting for delivery.
    Stopped,
}

/// What a task is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Awaiting {
    Nothing,
    Request(RequestKind, RequestId),
    Job(JobId),
}

/// Whether [`Lobby::advance`](crate::Lobby) should run the task's next
/// step right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Continue,
    Wait,
}

/// Step of a task that issues one request and waits for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestStep {
    Issue,
    Awaiting(RequestId),
}

/// Step of a task that queues one web job and waits for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobStep {
    Issue,
    Awaiting(JobId),
}

pub(crate) enum TaskKind {
    Create(CreateTask),
    Join(JoinTask),
    Search(SearchTask),
    Update(UpdateTask),
    Delete(DeleteTask),
    Query(QueryTask),
    GetUsers(StreamCallback<SessionUser>),
    SetLocalUserData(SetLocalUserDataTask),
    EnsureBestHost(EnsureBestHostTask),
    SendHostHint(HostHintTask),
    MigrationServer(MigrationServerTask),
    SetAdvertisement(SetAdvertisementTask),
    GetAdvertisement(GetAdvertisementTask),
    /// Start, end, migrate and user data registration: the work is done
    /// when the task starts, only the callback is deferred.
    Immediate {
        name: &'static str,
        callback: Callback<()>,
    },
}

impl TaskKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Join(_) => "join",
            Self::Search(_) => "search",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
            Self::Query(_) => "query",
            Self::GetUsers(_) => "get_users",
            Self::SetLocalUserData(_) => "set_local_user_data",
            Self::EnsureBestHost(_) => "ensure_best_host",
            Self::SendHostHint(_) => "send_host_hint",
            Self::MigrationServer(_) => "migration_server",
            Self::SetAdvertisement(_) => "set_advertisement",
            Self::GetAdvertisement(_) => "get_advertisement",
            Self::Immediate { name, .. } => *name,
        }
    }

    pub(crate) fn awaiting(&self) -> Awaiting {
        fn request(step: RequestStep, kind: RequestKind) -> Awaiting {
            match step {
                RequestStep::Awaiting(id) => Awaiting::Request(kind, id),
                RequestStep::Issue => Awaiting::Nothing,
            }
        }
        fn job(step: JobStep) -> Awaiting {
            match step {
                JobStep::Awaiting(id) => Awaiting::Job(id),
                JobStep::Issue => Awaiting::Nothing,
            }
        }

        match self {
            Self::Create(t) => t.awaiting(),
            Self::Join(t) => t.awaiting(),
            Self::Search(t) => t.awaiting(),
            Self::Delete(t) => t.awaiting(),
            Self::EnsureBestHost(t) => t.awaiting(),
            Self::Update(t) => request(t.step, RequestKind::SetRoomDataExternal),
            Self::Query(t) => request(t.step, RequestKind::GetRoomDataExternalList),
            Self::SetLocalUserData(t) => request(t.step, RequestKind::SetRoomMemberDataInternal),
            Self::SendHostHint(t) => request(t.step, RequestKind::SetRoomDataInternal),
            Self::SetAdvertisement(t) => job(t.step),
            Self::GetAdvertisement(t) => job(t.step),
            Self::GetUsers(_) | Self::MigrationServer(_) | Self::Immediate { .. } => {
                Awaiting::Nothing
            }
        }
    }

    /// Whether `request` is one of this task's parallel latency probes.
    pub(crate) fn awaits_probe(&self, request: RequestId) -> bool {
        match self {
            Self::Search(t) => t.info.awaits_probe(request),
            _ => false,
        }
    }
}

pub(crate) struct Task {
    pub(crate) session: Option<SessionHandle>,
    pub(crate) state: TaskState,
    /// First error wins.
    pub(crate) error: Option<LobbyError>,
    pub(crate) kind: TaskKind,
    pub(crate) timer: Stopwatch,
}

impl Task {
    pub(crate) fn new(session: Option<SessionHandle>, kind: TaskKind, now: Instant) -> Self {
        Self {
            session,
            state: TaskState::Running,
            error: None,
            kind,
            timer: Stopwatch::start_at(now),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.state != TaskState::Stopped
    }
}

/// Fixed-capacity task table plus the completion queue.
pub(crate) struct TaskPool {
    tasks: SlotArena<Task>,
    completions: VecDeque<TaskId>,
}

impl TaskPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            tasks: SlotArena::with_capacity(capacity),
            completions: VecDeque::new(),
        }
    }

    /// # Errors
    /// [`LobbyError::TooManyTasks`] if every slot is in use.
    pub(crate) fn insert(&mut self, task: Task) -> Result<TaskId, LobbyError> {
        self.tasks
            .insert(task)
            .map(TaskId)
            .map_err(|_| LobbyError::TooManyTasks)
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(id.0)
    }

    pub(crate) fn kind_mut(&mut self, id: TaskId) -> Option<&mut TaskKind> {
        self.get_mut(id).map(|t| &mut t.kind)
    }

    pub(crate) fn ids(&self) -> Vec<TaskId> {
        self.tasks.keys().into_iter().map(TaskId).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// First task not yet stopped that satisfies `pred`.
    pub(crate) fn find(&self, mut pred: impl FnMut(&Task) -> bool) -> Option<TaskId> {
        self.tasks
            .iter()
            .find(|(_, task)| task.is_live() && pred(task))
            .map(|(key, _)| TaskId(key))
    }

    /// Tasks not yet stopped that belong to `session`.
    pub(crate) fn on_session(&self, session: SessionHandle) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.is_live() && task.session == Some(session))
            .map(|(key, _)| TaskId(key))
            .collect()
    }

    /// Stops the task and queues it for delivery. Returns `false` if it was
    /// already stopped (or is gone).
    pub(crate) fn stop(&mut self, id: TaskId) -> bool {
        let Some(task) = self.tasks.get_mut(id.0) else {
            return false;
        };
        if !task.is_live() {
            return false;
        }
        task.state = TaskState::Stopped;
        self.completions.push_back(id);
        true
    }

    /// Records `error` and stops the task. A task that already stopped
    /// keeps its outcome.
    pub(crate) fn fail(&mut self, id: TaskId, error: LobbyError) -> bool {
        let Some(task) = self.tasks.get_mut(id.0) else {
            return false;
        };
        if !task.is_live() {
            return false;
        }
        tracing::debug!(task = %id, kind = task.kind.name(), %error, "task failed");
        task.error.get_or_insert(error);
        self.stop(id)
    }

    /// Moves a running task to `Cancelling`.
    pub(crate) fn cancel(&mut self, id: TaskId) -> bool {
        match self.tasks.get_mut(id.0) {
            Some(task) if task.state == TaskState::Running => {
                task.state = TaskState::Cancelling;
                true
            }
            _ => false,
        }
    }

    /// Takes the next stopped task out of the table.
    pub(crate) fn pop_completion(&mut self) -> Option<(TaskId, Task)> {
        while let Some(id) = self.completions.pop_front() {
            if let Some(task) = self.tasks.remove(id.0) {
                return Some((id, task));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate() -> TaskKind {
        TaskKind::Immediate {
            name: "start",
            callback: Box::new(|_| {}),
        }
    }

    fn pool(capacity: usize) -> TaskPool {
        TaskPool::new(capacity)
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_full_pool_too_many_tasks() {
        let mut pool = pool(1);
        pool.insert(Task::new(None, immediate(), Instant::now())).unwrap();
        let err = pool.insert(Task::new(None, immediate(), Instant::now())).unwrap_err();
        assert!(matches!(err, LobbyError::TooManyTasks));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_first_error_wins() {
        let mut pool = pool(2);
        let id = pool.insert(Task::new(None, immediate(), Instant::now())).unwrap();
        assert!(pool.fail(id, LobbyError::RoomFull));
        assert!(!pool.fail(id, LobbyError::InternalError));

        let (_, task) = pool.pop_completion().unwrap();
        assert!(matches!(task.error, Some(LobbyError::RoomFull)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_twice_queues_once() {
        let mut pool = pool(2);
        let id = pool.insert(Task::new(None, immediate(), Instant::now())).unwrap();
        assert!(pool.stop(id));
        assert!(!pool.stop(id));
        assert!(pool.pop_completion().is_some());
        assert!(pool.pop_completion().is_none());
        assert!(pool.get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_skips_stopped_tasks() {
        let mut pool = pool(2);
        let id = pool.insert(Task::new(None, immediate(), Instant::now())).unwrap();
        pool.stop(id);
        assert!(pool.find(|_| true).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_only_running() {
        let mut pool = pool(2);
        let id = pool.insert(Task::new(None, immediate(), Instant::now())).unwrap();
        assert!(pool.cancel(id));
        assert!(!pool.cancel(id));
        assert_eq!(pool.get(id).unwrap().state, TaskState::Cancelling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_reuse_rejects_old_id() {
        let mut pool = pool(1);
        let old = pool.insert(Task::new(None, immediate(), Instant::now())).unwrap();
        pool.stop(old);
        pool.pop_completion();
        let new = pool.insert(Task::new(None, immediate(), Instant::now())).unwrap();
        assert_ne!(old, new);
        assert!(pool.get(old).is_none());
        assert!(!pool.fail(old, LobbyError::Cancelled));
    }
}
