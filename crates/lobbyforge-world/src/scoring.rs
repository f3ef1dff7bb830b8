//! World ranking.
//!
//! The platform only tells us two things about a world: how many rooms it
//! has and how many members those rooms hold. More rooms means a better
//! search result list; a higher players-per-room ratio suggests game
//! sessions rather than two-player squads. Both metrics are scored on a
//! ramp that peaks at a configurable pivot and falls off slightly past it,
//! so the single busiest world does not attract every new room.

use std::cmp::Reverse;

use lobbyforge_protocol::{WorldId, WorldInfo};
use rand::Rng;
use tracing::debug;

use crate::{WorldError, WorldScoringConfig};

/// What the ranked list will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldPurpose {
    /// Pick a world to create a room on: least busy eligible world first.
    Create,
    /// Pick worlds to search: busiest first.
    Search,
}

fn metric_score(value: f32, most: f32, bonus: f32, pivot: f32) -> u32 {
    let pivot_at = most * pivot;
    let ramp_up = bonus / pivot_at;
    let ramp_down = if pivot < 1.0 {
        bonus * 0.33 / (most - pivot_at)
    } else {
        0.0
    };
    let score = if value <= pivot_at {
        value * ramp_up
    } else {
        bonus - (value - pivot_at) * ramp_down
    };
    // Float-to-int `as` truncates and saturates negatives to 0.
    score as u32
}

/// Scores every world, in listing order. Empty worlds score 0.
pub fn score_worlds(worlds: &[WorldInfo], config: &WorldScoringConfig) -> Vec<u32> {
    let most_rooms = worlds.iter().map(|w| w.num_rooms).max().unwrap_or(0).max(1) as f32;
    let most_ppr = worlds
        .iter()
        .filter(|w| w.num_rooms > 0)
        .map(|w| w.num_members as f32 / w.num_rooms as f32)
        .fold(1.0f32, f32::max);

    worlds
        .iter()
        .map(|w| {
            if w.num_rooms == 0 {
                return 0;
            }
            let ppr = w.num_members as f32 / w.num_rooms as f32;
            let rooms = metric_score(
                w.num_rooms as f32,
                most_rooms,
                config.num_rooms_bonus as f32,
                config.num_rooms_pivot,
            );
            let players = metric_score(
                ppr,
                most_ppr,
                config.players_per_room_bonus as f32,
                config.players_per_room_pivot,
            );
            debug!(world = %w.id, rooms = w.num_rooms, ppr, rooms_score = rooms, players_score = players, "world scored");
            rooms.saturating_add(players)
        })
        .collect()
}

/// Ranks `worlds` for `purpose`.
///
/// - With `forced_world` set, returns just that world if listed, otherwise
///   the first listed world.
/// - `Create`: worlds below the room limit, lowest score (plus a random
///   jitter below `random_bonus`) first.
/// - `Search`: worlds scoring above zero plus always the first listed
///   world, highest score first, at most `max_worlds_to_search`.
///
/// Ties keep listing order.
///
/// # Errors
/// - [`WorldError::NoWorlds`] if `worlds` is empty.
/// - [`WorldError::NoEligibleWorld`] if every world is full (create).
pub fn rank_worlds<R: Rng + ?Sized>(
    worlds: &[WorldInfo],
    purpose: WorldPurpose,
    config: &WorldScoringConfig,
    rng: &mut R,
) -> Result<Vec<WorldId>, WorldError> {
    let Some(first) = worlds.first() else {
        return Err(WorldError::NoWorlds);
    };

    if let Some(forced) = config.forced_world {
        let id = if worlds.iter().any(|w| w.id == forced) {
            forced
        } else {
            debug!(%forced, fallback = %first.id, "forced world not listed");
            first.id
        };
        return Ok(vec![id]);
    }

    let scores = score_worlds(worlds, config);
    let ranked: Vec<WorldId> = match purpose {
        WorldPurpose::Create => {
            let limit = config.room_limit();
            let mut eligible: Vec<(u32, usize)> = worlds
                .iter()
                .zip(&scores)
                .enumerate()
                .filter(|(_, (w, _))| w.num_rooms < limit)
                .map(|(i, (_, &score))| {
                    let jitter = if config.random_bonus > 0 {
                        rng.random_range(0..config.random_bonus)
                    } else {
                        0
                    };
                    (score.saturating_add(jitter), i)
                })
                .collect();
            eligible.sort_by_key(|&(score, i)| (score, i));
            eligible.into_iter().map(|(_, i)| worlds[i].id).collect()
        }
        WorldPurpose::Search => {
            let mut eligible: Vec<(u32, usize)> = scores
                .iter()
                .enumerate()
                .filter(|&(i, &score)| score > 0 || i == 0)
                .map(|(i, &score)| (score, i))
                .collect();
            eligible.sort_by_key(|&(score, i)| (Reverse(score), i));
            eligible.truncate(config.max_worlds_to_search);
            eligible.into_iter().map(|(_, i)| worlds[i].id).collect()
        }
    };

    if ranked.is_empty() {
        return Err(WorldError::NoEligibleWorld);
    }
    debug!(?purpose, worlds = ?ranked, "worlds ranked");
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_score_peaks_at_pivot() {
        assert_eq!(metric_score(50.0, 100.0, 100.0, 0.5), 100);
        assert_eq!(metric_score(25.0, 100.0, 100.0, 0.5), 50);
    }

    #[test]
    fn test_metric_score_ramps_down_past_pivot() {
        // ramp_down = 33 / 50 = 0.66 per unit; at the busiest world the
        // score has lost a third of the bonus.
        assert_eq!(metric_score(100.0, 100.0, 100.0, 0.5), 67);
    }

    #[test]
    fn test_metric_score_full_pivot_never_ramps_down() {
        assert_eq!(metric_score(10.0, 10.0, 40.0, 1.0), 40);
    }
}
