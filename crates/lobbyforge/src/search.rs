//! Multi-world room search with latency probes.
//!
//! ```text
//! ListWorlds → AwaitWorlds → NextWorld ⇄ AwaitRooms
//!                                │
//!                                └► StartProbes → AwaitProbes
//! ```

use std::time::Duration;

use lobbyforge_protocol::{
    AttributeFilter, PlatformErrorCode, PlatformRequest, PlatformResponse, RequestId, RequestKind,
    RoomSummary, SearchFilter, SessionId, SessionUserData,
};
use lobbyforge_world::{SearchCandidate, SearchInfo, WorldPurpose, rank_worlds};
use tracing::{debug, info, warn};

use crate::task::{Awaiting, Progress, TaskKind};
use crate::{Lobby, LobbyError, LocalUser, StreamCallback, Streamed, TaskId};

/// What to look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    /// Upper bound on results. The lobby's own cap may lower it further.
    pub max_results: u32,
    pub filters: Vec<SearchFilter>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            max_results: 10,
            filters: Vec::new(),
        }
    }
}

/// One room found by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Pass this to [`Lobby::session_join`].
    pub id: SessionId,
    pub summary: RoomSummary,
    pub user_data: Vec<SessionUserData>,
    /// Round-trip time to the room. [`UNKNOWN_PING`](lobbyforge_world::UNKNOWN_PING)
    /// if the probe never answered.
    pub ping: Duration,
}

impl From<SearchCandidate> for SearchResult {
    fn from(candidate: SearchCandidate) -> Self {
        let summary = candidate.summary;
        Self {
            id: SessionId::new(summary.world, summary.room, summary.server, 0),
            user_data: candidate.user_data,
            ping: candidate.ping,
            summary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchStep {
    ListWorlds,
    AwaitWorlds(RequestId),
    NextWorld,
    AwaitRooms(RequestId),
    StartProbes,
    AwaitProbes,
}

pub(crate) struct SearchTask {
    pub(crate) step: SearchStep,
    pub(crate) info: SearchInfo,
    filters: Vec<AttributeFilter>,
    callback: StreamCallback<SearchResult>,
}

impl SearchTask {
    pub(crate) fn awaiting(&self) -> Awaiting {
        match self.step {
            SearchStep::AwaitWorlds(id) => Awaiting::Request(RequestKind::GetWorldInfoList, id),
            SearchStep::AwaitRooms(id) => Awaiting::Request(RequestKind::SearchRoom, id),
            _ => Awaiting::Nothing,
        }
    }
}

impl Lobby {
    /// Searches the busiest worlds for rooms matching `params`.
    ///
    /// `callback` receives one [`Streamed::Item`] per room, then
    /// [`Streamed::Done`].
    ///
    /// # Errors
    /// - [`LobbyError::InvalidParam`] if `max_results` is zero.
    /// - [`LobbyError::UserDataNotRegistered`] or
    ///   [`LobbyError::InvalidParam`] for a bad filter.
    /// - [`LobbyError::TooManyTasks`] if the task pool is full.
    pub fn session_search(
        &mut self,
        user: LocalUser,
        params: SearchParams,
        callback: impl FnMut(Streamed<SearchResult>) + Send + 'static,
    ) -> Result<TaskId, LobbyError> {
        if params.max_results == 0 {
            return Err(LobbyError::InvalidParam);
        }
        let filters = self.user_data.filters(&params.filters)?;
        let capacity = (params.max_results as usize).min(self.config.max_rooms_to_store);
        debug!(user = user.0, capacity, filters = filters.len(), "search requested");

        let task = SearchTask {
            step: SearchStep::ListWorlds,
            info: SearchInfo::new(capacity),
            filters,
            callback: Box::new(callback),
        };
        self.start_task(None, TaskKind::Search(task))
    }

    fn search_task(&mut self, id: TaskId) -> Option<&mut SearchTask> {
        match self.tasks.kind_mut(id)? {
            TaskKind::Search(t) => Some(t),
            _ => None,
        }
    }

    fn set_search_step(&mut self, id: TaskId, step: SearchStep) {
        if let Some(t) = self.search_task(id) {
            t.step = step;
        }
    }

    pub(crate) fn advance_search(&mut self, id: TaskId) -> Progress {
        let Some(step) = self.search_task(id).map(|t| t.step) else {
            return Progress::Wait;
        };

        match step {
            SearchStep::ListWorlds => {
                let request = PlatformRequest::GetWorldInfoList {
                    server: self.config.server,
                };
                if let Some(request) = self.issue(id, request) {
                    self.set_search_step(id, SearchStep::AwaitWorlds(request));
                }
                Progress::Wait
            }
            SearchStep::NextWorld => {
                let Some(t) = self.search_task(id) else {
                    return Progress::Wait;
                };
                let Some(world) = t.info.next_world() else {
                    t.step = SearchStep::StartProbes;
                    return Progress::Continue;
                };
                let request = PlatformRequest::SearchRoom {
                    world,
                    filters: t.filters.clone(),
                    max_results: u32::try_from(t.info.remaining()).unwrap_or(u32::MAX),
                };
                debug!(task = %id, %world, "searching world");
                if let Some(request) = self.issue(id, request) {
                    self.set_search_step(id, SearchStep::AwaitRooms(request));
                }
                Progress::Wait
            }
            SearchStep::StartProbes => {
                self.start_probes(id);
                Progress::Wait
            }
            SearchStep::AwaitProbes => {
                let budget = self.config.qos_budget;
                let now = self.now;
                let Some(task) = self.tasks.get_mut(id) else {
                    return Progress::Wait;
                };
                let expired = task.timer.exceeded(now, budget);
                let TaskKind::Search(t) = &mut task.kind else {
                    return Progress::Wait;
                };
                if t.info.outstanding_probes() == 0 {
                    self.tasks.stop(id);
                } else if expired {
                    info!(task = %id, outstanding = t.info.outstanding_probes(), "probe budget spent");
                    t.info.abandon_probes();
                    self.tasks.stop(id);
                }
                Progress::Wait
            }
            SearchStep::AwaitWorlds(_) | SearchStep::AwaitRooms(_) => Progress::Wait,
        }
    }

    /// One ping probe per candidate. A probe the platform refuses is
    /// skipped; its candidate keeps the unknown ping.
    fn start_probes(&mut self, id: TaskId) {
        let Some(rooms) = self.search_task(id).map(|t| {
            t.info
                .candidates()
                .iter()
                .map(|c| c.summary.room)
                .collect::<Vec<_>>()
        }) else {
            return;
        };
        if rooms.is_empty() {
            debug!(task = %id, "search found nothing");
            self.tasks.stop(id);
            return;
        }

        let mut probes = Vec::with_capacity(rooms.len());
        for (index, room) in rooms.into_iter().enumerate() {
            match self.platform.issue(PlatformRequest::GetPingInfo { room }) {
                Ok(request) => probes.push((index, request)),
                Err(code) => warn!(task = %id, %room, %code, "ping probe rejected"),
            }
        }

        let now = self.now;
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        task.timer.restart(now);
        let TaskKind::Search(t) = &mut task.kind else {
            return;
        };
        for (index, request) in probes {
            t.info.start_probe(index, request);
        }
        debug!(task = %id, probes = t.info.outstanding_probes(), "latency probes started");
        if t.info.outstanding_probes() == 0 {
            self.tasks.stop(id);
        } else {
            t.step = SearchStep::AwaitProbes;
        }
    }

    pub(crate) fn on_search_response(
        &mut self,
        id: TaskId,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        match result {
            Ok(PlatformResponse::WorldInfoList(worlds)) => {
                match rank_worlds(
                    &worlds,
                    WorldPurpose::Search,
                    &self.config.scoring,
                    &mut self.rng,
                ) {
                    Ok(ranked) => {
                        debug!(task = %id, worlds = ranked.len(), "worlds ranked for search");
                        if let Some(t) = self.search_task(id) {
                            t.info.set_worlds(ranked);
                            t.step = SearchStep::NextWorld;
                        }
                    }
                    Err(err) => {
                        self.tasks.fail(id, err.into());
                    }
                }
            }
            Ok(PlatformResponse::RoomsFound(rooms)) => {
                let found: Vec<SearchCandidate> = rooms
                    .into_iter()
                    .map(|summary| {
                        let user_data = self.user_data.decode(&summary.attributes);
                        SearchCandidate::new(summary, user_data)
                    })
                    .collect();
                if let Some(t) = self.search_task(id) {
                    let kept = t.info.push_results(found);
                    debug!(task = %id, kept, total = t.info.candidates().len(), "rooms found");
                    t.step = SearchStep::NextWorld;
                }
            }
            Ok(other) => {
                warn!(task = %id, response = ?other, "unexpected response to search");
                self.tasks.fail(id, LobbyError::InternalError);
            }
            Err(code) => self.fail_platform(id, code),
        }
    }

    /// A probe answer. Probe errors only cost the candidate its ping.
    pub(crate) fn on_probe_response(
        &mut self,
        id: TaskId,
        request: RequestId,
        result: Result<PlatformResponse, PlatformErrorCode>,
    ) {
        let rtt = match result {
            Ok(PlatformResponse::PingInfo { rtt }) => Some(rtt),
            Ok(other) => {
                warn!(task = %id, %request, response = ?other, "unexpected probe response");
                None
            }
            Err(code) => {
                debug!(task = %id, %request, %code, "probe failed");
                None
            }
        };
        let Some(t) = self.search_task(id) else {
            return;
        };
        t.info.record_probe(request, rtt);
        if t.step == SearchStep::AwaitProbes && t.info.outstanding_probes() == 0 {
            self.tasks.stop(id);
        }
    }

    pub(crate) fn finish_search(&mut self, result: Result<(), LobbyError>, task: SearchTask) {
        let SearchTask { info, mut callback, .. } = task;
        if result.is_ok() {
            for candidate in info.into_candidates() {
                callback(Streamed::Item(candidate.into()));
            }
        }
        callback(Streamed::Done(result));
    }
}
