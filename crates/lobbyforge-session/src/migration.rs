//! Host migration bookkeeping carried by each session.
//!
//! The coordinator that drives migrations lives in the lobby; this is just
//! the per-session record it reads and writes.

use tokio::time::Instant;

use crate::SlotKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationState {
    #[default]
    Idle,
    Migrating,
}

#[derive(Debug, Clone, Default)]
pub struct HostMigrationInfo {
    pub state: MigrationState,
    /// The platform side of the handover is done (ownership moved and the
    /// new host has announced itself).
    pub matchmaking_finished: bool,
    pub session_migrated: bool,
    pub new_host_address_valid: bool,
    /// Task driving the migration, if one is running.
    pub task: Option<SlotKey>,
    started: Option<Instant>,
}

impl HostMigrationInfo {
    pub fn is_migrating(&self) -> bool {
        self.state == MigrationState::Migrating
    }

    /// Enters `Migrating`. Returns `false` if a migration is already in
    /// flight.
    pub fn begin(&mut self, now: Instant) -> bool {
        if self.is_migrating() {
            return false;
        }
        *self = Self {
            state: MigrationState::Migrating,
            started: Some(now),
            ..Self::default()
        };
        true
    }

    pub fn finish_matchmaking(&mut self) {
        self.matchmaking_finished = true;
    }

    /// A migration that is ready to go back to `Idle`.
    pub fn is_finished(&self) -> bool {
        self.is_migrating() && self.matchmaking_finished
    }

    pub fn timed_out(&self, now: Instant, limit: std::time::Duration) -> bool {
        self.is_migrating()
            && self
                .started
                .is_some_and(|started| now.saturating_duration_since(started) > limit)
    }

    /// Back to `Idle`. Returns the migration task, if any, so the caller
    /// can cancel it.
    pub fn reset(&mut self) -> Option<SlotKey> {
        let task = self.task.take();
        *self = Self::default();
        task
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_begin_twice_rejected() {
        let now = Instant::now();
        let mut info = HostMigrationInfo::default();
        assert!(info.begin(now));
        assert!(!info.begin(now));
        assert!(info.is_migrating());
    }

    #[test]
    fn test_is_finished_requires_matchmaking_finished() {
        let mut info = HostMigrationInfo::default();
        info.begin(Instant::now());
        assert!(!info.is_finished());
        info.finish_matchmaking();
        assert!(info.is_finished());
        info.reset();
        assert!(!info.is_finished());
        assert!(!info.is_migrating());
    }

    #[test]
    fn test_timed_out_only_while_migrating() {
        let now = Instant::now();
        let limit = Duration::from_secs(10);
        let mut info = HostMigrationInfo::default();
        assert!(!info.timed_out(now + limit * 2, limit));
        info.begin(now);
        assert!(!info.timed_out(now + limit, limit));
        assert!(info.timed_out(now + limit * 2, limit));
    }
}
