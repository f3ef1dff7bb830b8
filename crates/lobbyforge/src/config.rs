//! Lobby configuration.

use std::time::Duration;

use lobbyforge_protocol::ServerId;
use lobbyforge_session::RegistryConfig;
use lobbyforge_world::WorldScoringConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Hard cap on the number of tasks in flight.
pub const MAX_TASKS: usize = 64;

/// Largest advertisement blob the web API accepts.
pub const MAX_ADVERTISEMENT_LEN: usize = 1024;

/// Everything tunable about a [`Lobby`](crate::Lobby).
///
/// ```rust
/// use std::time::Duration;
/// use lobbyforge::LobbyConfig;
///
/// let config = LobbyConfig {
///     signaling_timeout: Duration::from_secs(5),
///     ..LobbyConfig::default()
/// }
/// .validated();
/// assert_eq!(config.max_tasks, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// Matchmaking server whose worlds are listed.
    pub server: ServerId,
    pub max_tasks: usize,
    pub max_sessions: usize,
    /// Member table size per session, local peer included.
    pub max_members: usize,
    /// How long a member may stay in pending signaling (and how long a
    /// joining client waits for the owner's acknowledgement).
    pub signaling_timeout: Duration,
    /// How long a task waits for the answer to one platform request or
    /// web job.
    pub request_timeout: Duration,
    /// How long a search waits for latency probes.
    pub qos_budget: Duration,
    /// Hard cap on the results of one search, whatever the caller asks.
    pub max_rooms_to_store: usize,
    pub host_migration_enabled: bool,
    pub host_migration_timeout: Duration,
    pub max_advertisement_len: usize,
    pub scoring: WorldScoringConfig,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            server: ServerId(1),
            max_tasks: 16,
            max_sessions: 4,
            max_members: 16,
            signaling_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            qos_budget: Duration::from_secs(5),
            max_rooms_to_store: 20,
            host_migration_enabled: true,
            host_migration_timeout: Duration::from_secs(30),
            max_advertisement_len: MAX_ADVERTISEMENT_LEN,
            scoring: WorldScoringConfig::default(),
        }
    }
}

impl LobbyConfig {
    /// Clamps out-of-range values, logging each correction.
    pub fn validated(mut self) -> Self {
        if !(1..=MAX_TASKS).contains(&self.max_tasks) {
            let clamped = self.max_tasks.clamp(1, MAX_TASKS);
            warn!(max_tasks = self.max_tasks, using = clamped, "max_tasks out of range, clamping");
            self.max_tasks = clamped;
        }
        let registry = self.registry();
        self.max_sessions = registry.max_sessions;
        self.max_members = registry.max_members;

        for (name, value, fallback) in [
            ("signaling_timeout", &mut self.signaling_timeout, Duration::from_secs(15)),
            ("request_timeout", &mut self.request_timeout, Duration::from_secs(30)),
            ("qos_budget", &mut self.qos_budget, Duration::from_secs(5)),
            ("host_migration_timeout", &mut self.host_migration_timeout, Duration::from_secs(30)),
        ] {
            if value.is_zero() {
                warn!(field = name, using_ms = fallback.as_millis() as u64, "zero timeout, using default");
                *value = fallback;
            }
        }
        if self.max_rooms_to_store == 0 {
            warn!("max_rooms_to_store is 0, using 1");
            self.max_rooms_to_store = 1;
        }
        if self.max_advertisement_len > MAX_ADVERTISEMENT_LEN {
            warn!(
                max_advertisement_len = self.max_advertisement_len,
                using = MAX_ADVERTISEMENT_LEN,
                "advertisement cap above platform limit, clamping"
            );
            self.max_advertisement_len = MAX_ADVERTISEMENT_LEN;
        }
        self.scoring = self.scoring.validated();
        self
    }

    /// The session registry part of this config, validated.
    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            max_sessions: self.max_sessions,
            max_members: self.max_members,
        }
        .validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_clamps_zero_values() {
        let cfg = LobbyConfig {
            max_tasks: 0,
            signaling_timeout: Duration::ZERO,
            request_timeout: Duration::ZERO,
            max_rooms_to_store: 0,
            ..LobbyConfig::default()
        }
        .validated();
        assert_eq!(cfg.max_tasks, 1);
        assert_eq!(cfg.signaling_timeout, Duration::from_secs(15));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_rooms_to_store, 1);
    }

    #[test]
    fn test_validated_caps_advertisement_len() {
        let cfg = LobbyConfig {
            max_advertisement_len: 4096,
            ..LobbyConfig::default()
        }
        .validated();
        assert_eq!(cfg.max_advertisement_len, MAX_ADVERTISEMENT_LEN);
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let cfg: LobbyConfig =
            serde_json::from_str(r#"{"max_tasks": 8, "host_migration_enabled": false}"#).unwrap();
        assert_eq!(cfg.max_tasks, 8);
        assert!(!cfg.host_migration_enabled);
        assert_eq!(cfg.qos_budget, Duration::from_secs(5));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }
}
