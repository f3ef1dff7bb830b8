//! World scoring configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

use lobbyforge_protocol::WorldId;

/// Hard platform limit on rooms per world.
pub const MAX_ROOMS_PER_WORLD: u32 = 5000;

/// Knobs of the world ranking heuristic.
///
/// Each metric (rooms per world, players per room) earns up to `*_bonus`
/// points. The score ramps up linearly to the bonus at `*_pivot` of the
/// busiest world's value, then ramps down to a third of the bonus at the
/// busiest world itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldScoringConfig {
    pub num_rooms_bonus: u32,
    /// Fraction (0.0–1.0] of the busiest world's room count that scores
    /// the full bonus.
    pub num_rooms_pivot: f32,
    pub players_per_room_bonus: u32,
    /// Fraction (0.0–1.0] of the best players-per-room ratio that scores
    /// the full bonus.
    pub players_per_room_pivot: f32,
    /// Upper bound (exclusive) of the random jitter added to create scores.
    pub random_bonus: u32,
    /// Worlds with at least this many rooms are not used for creation.
    /// Capped at [`MAX_ROOMS_PER_WORLD`].
    pub max_rooms_per_world: u32,
    pub max_worlds_to_search: usize,
    /// Skip scoring and always use this world (if listed).
    pub forced_world: Option<WorldId>,
}

impl Default for WorldScoringConfig {
    fn default() -> Self {
        Self {
            num_rooms_bonus: 100,
            num_rooms_pivot: 0.5,
            players_per_room_bonus: 50,
            players_per_room_pivot: 0.5,
            random_bonus: 10,
            max_rooms_per_world: 4500,
            max_worlds_to_search: 5,
            forced_world: None,
        }
    }
}

impl WorldScoringConfig {
    const MIN_PIVOT: f32 = 0.01;

    /// Clamps pivots to `0.01..=1.0` and `max_worlds_to_search` to at
    /// least 1.
    pub fn validated(mut self) -> Self {
        for (name, pivot) in [
            ("num_rooms_pivot", &mut self.num_rooms_pivot),
            ("players_per_room_pivot", &mut self.players_per_room_pivot),
        ] {
            if !(Self::MIN_PIVOT..=1.0).contains(pivot) {
                let clamped = if pivot.is_nan() {
                    1.0
                } else {
                    pivot.clamp(Self::MIN_PIVOT, 1.0)
                };
                warn!(field = name, value = *pivot, using = clamped, "pivot out of range, clamping");
                *pivot = clamped;
            }
        }
        if self.max_worlds_to_search == 0 {
            warn!("max_worlds_to_search is 0, using 1");
            self.max_worlds_to_search = 1;
        }
        self
    }

    /// The effective room limit for creation.
    pub fn room_limit(&self) -> u32 {
        self.max_rooms_per_world.min(MAX_ROOMS_PER_WORLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validated_clamps_pivots() {
        let cfg = WorldScoringConfig {
            num_rooms_pivot: 0.0,
            players_per_room_pivot: 4.0,
            max_worlds_to_search: 0,
            ..WorldScoringConfig::default()
        }
        .validated();
        assert_eq!(cfg.num_rooms_pivot, 0.01);
        assert_eq!(cfg.players_per_room_pivot, 1.0);
        assert_eq!(cfg.max_worlds_to_search, 1);
    }

    #[test]
    fn test_room_limit_capped_by_platform() {
        let cfg = WorldScoringConfig {
            max_rooms_per_world: 9000,
            ..WorldScoringConfig::default()
        };
        assert_eq!(cfg.room_limit(), MAX_ROOMS_PER_WORLD);
    }
}
