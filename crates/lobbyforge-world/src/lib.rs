//! World selection and search aggregation for Lobbyforge.
//!
//! Rooms live on worlds (shards) of the matchmaking service. Before a room
//! is created the lobby has to pick a world; before searching it has to
//! decide which worlds are worth querying and in what order. This crate
//! holds that heuristic ([`rank_worlds`]) and the accumulator a search
//! fills in as it walks the ranked worlds and probes latency
//! ([`SearchInfo`]).
//!
//! # Key types
//!
//! - [`WorldScoringConfig`]: bonus/pivot knobs, forced world, limits
//! - [`WorldPurpose`]: create (least busy first) or search (busiest first)
//! - [`SearchInfo`] / [`SearchCandidate`]: search state

mod config;
mod error;
mod scoring;
mod search;

pub use config::{MAX_ROOMS_PER_WORLD, WorldScoringConfig};
pub use error::WorldError;
pub use scoring::{WorldPurpose, rank_worlds, score_worlds};
pub use search::{SearchCandidate, SearchInfo, UNKNOWN_PING};
