//! Error types for world ranking.

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The platform listed no worlds at all.
    #[error("world list is empty")]
    NoWorlds,

    /// Worlds were listed but none can take a new room.
    #[error("no world is eligible")]
    NoEligibleWorld,
}
