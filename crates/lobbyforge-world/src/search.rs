//! Search result accumulation across worlds, plus latency probes.

use std::time::Duration;

use lobbyforge_protocol::{RequestId, RoomSummary, SessionUserData, WorldId};

/// Ping reported for a candidate whose probe never came back.
pub const UNKNOWN_PING: Duration = Duration::from_millis(3000);

/// One room found by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub summary: RoomSummary,
    /// Session data decoded from the room attributes.
    pub user_data: Vec<SessionUserData>,
    pub ping: Duration,
    probe: Option<RequestId>,
}

impl SearchCandidate {
    pub fn new(summary: RoomSummary, user_data: Vec<SessionUserData>) -> Self {
        Self {
            summary,
            user_data,
            ping: UNKNOWN_PING,
            probe: None,
        }
    }
}

/// State of a multi-world search.
///
/// ```text
/// set_worlds → next_world → push_results → next_world → ... → start_probe × n
///                                                          → record_probe × n
/// ```
#[derive(Debug, Clone)]
pub struct SearchInfo {
    worlds: Vec<WorldId>,
    cursor: usize,
    capacity: usize,
    candidates: Vec<SearchCandidate>,
    outstanding: usize,
}

impl SearchInfo {
    /// `capacity` is the most candidates this search will ever hold.
    pub fn new(capacity: usize) -> Self {
        Self {
            worlds: Vec::new(),
            cursor: 0,
            capacity,
            candidates: Vec::new(),
            outstanding: 0,
        }
    }

    pub fn set_worlds(&mut self, worlds: Vec<WorldId>) {
        self.worlds = worlds;
        self.cursor = 0;
    }

    /// The next world to search, or `None` once the list is exhausted or
    /// there is no room left for more candidates.
    pub fn next_world(&mut self) -> Option<WorldId> {
        if !self.has_capacity() {
            return None;
        }
        let world = self.worlds.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(world)
    }

    pub fn has_capacity(&self) -> bool {
        self.candidates.len() < self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.candidates.len())
    }

    /// Adds candidates until the capacity is reached. Returns how many were
    /// kept.
    pub fn push_results(&mut self, found: impl IntoIterator<Item = SearchCandidate>) -> usize {
        let take = self.remaining();
        let before = self.candidates.len();
        self.candidates.extend(found.into_iter().take(take));
        self.candidates.len() - before
    }

    pub fn candidates(&self) -> &[SearchCandidate] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Records the correlation id of the probe issued for candidate `index`.
    pub fn start_probe(&mut self, index: usize, request: RequestId) {
        if let Some(candidate) = self.candidates.get_mut(index) {
            if candidate.probe.replace(request).is_none() {
                self.outstanding += 1;
            }
        }
    }

    /// Whether `request` is one of this search's outstanding probes.
    pub fn awaits_probe(&self, request: RequestId) -> bool {
        self.candidates.iter().any(|c| c.probe == Some(request))
    }

    /// Completes the probe `request`. `rtt` is `None` if the probe failed,
    /// which keeps the candidate at [`UNKNOWN_PING`]. Returns `false` if
    /// the probe is not outstanding.
    pub fn record_probe(&mut self, request: RequestId, rtt: Option<Duration>) -> bool {
        let Some(candidate) = self.candidates.iter_mut().find(|c| c.probe == Some(request)) else {
            return false;
        };
        candidate.probe = None;
        if let Some(rtt) = rtt {
            candidate.ping = rtt;
        }
        self.outstanding = self.outstanding.saturating_sub(1);
        true
    }

    pub fn outstanding_probes(&self) -> usize {
        self.outstanding
    }

    /// Abandons every outstanding probe. Late responses are then ignored.
    pub fn abandon_probes(&mut self) {
        for candidate in &mut self.candidates {
            candidate.probe = None;
        }
        self.outstanding = 0;
    }

    pub fn into_candidates(self) -> Vec<SearchCandidate> {
        self.candidates
    }
}

#[cfg(test)]
mod tests {
    use lobbyforge_protocol::{RoomAttributes, RoomId, ServerId};

    use super::*;

    fn summary(room: u64) -> RoomSummary {
        RoomSummary {
            room: RoomId(room),
            world: WorldId(1),
            server: ServerId(1),
            owner: None,
            public_slots: 4,
            open_public_slots: 2,
            private_slots: 0,
            open_private_slots: 0,
            attributes: RoomAttributes::default(),
        }
    }

    fn candidates(n: u64) -> Vec<SearchCandidate> {
        (1..=n).map(|r| SearchCandidate::new(summary(r), Vec::new())).collect()
    }

    #[test]
    fn test_push_results_stops_at_capacity() {
        let mut info = SearchInfo::new(3);
        assert_eq!(info.push_results(candidates(2)), 2);
        assert_eq!(info.push_results(candidates(5)), 1);
        assert!(!info.has_capacity());
        assert_eq!(info.candidates().len(), 3);
    }

    #[test]
    fn test_next_world_stops_when_full() {
        let mut info = SearchInfo::new(1);
        info.set_worlds(vec![WorldId(1), WorldId(2)]);
        assert_eq!(info.next_world(), Some(WorldId(1)));
        info.push_results(candidates(1));
        assert_eq!(info.next_world(), None);
    }

    #[test]
    fn test_next_world_walks_list_once() {
        let mut info = SearchInfo::new(10);
        info.set_worlds(vec![WorldId(4), WorldId(2)]);
        assert_eq!(info.next_world(), Some(WorldId(4)));
        assert_eq!(info.next_world(), Some(WorldId(2)));
        assert_eq!(info.next_world(), None);
    }

    #[test]
    fn test_record_probe_sets_ping_and_counts_down() {
        let mut info = SearchInfo::new(4);
        info.push_results(candidates(2));
        info.start_probe(0, RequestId(10));
        info.start_probe(1, RequestId(11));
        assert_eq!(info.outstanding_probes(), 2);

        assert!(info.record_probe(RequestId(11), Some(Duration::from_millis(42))));
        assert!(info.record_probe(RequestId(10), None));
        assert_eq!(info.outstanding_probes(), 0);
        assert_eq!(info.candidates()[1].ping, Duration::from_millis(42));
        assert_eq!(info.candidates()[0].ping, UNKNOWN_PING);
    }

    #[test]
    fn test_record_probe_unknown_request_ignored() {
        let mut info = SearchInfo::new(1);
        info.push_results(candidates(1));
        info.start_probe(0, RequestId(1));
        assert!(!info.record_probe(RequestId(2), Some(Duration::ZERO)));
        assert!(info.record_probe(RequestId(1), Some(Duration::ZERO)));
        assert!(!info.record_probe(RequestId(1), Some(Duration::ZERO)));
        assert_eq!(info.outstanding_probes(), 0);
    }

    #[test]
    fn test_abandon_probes_ignores_late_responses() {
        let mut info = SearchInfo::new(2);
        info.push_results(candidates(2));
        info.start_probe(0, RequestId(1));
        info.abandon_probes();
        assert!(!info.awaits_probe(RequestId(1)));
        assert!(!info.record_probe(RequestId(1), Some(Duration::from_millis(5))));
    }
}
