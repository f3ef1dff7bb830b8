//! Session and room-member bookkeeping for Lobbyforge.
//!
//! This crate owns the tables the lobby works on:
//!
//! 1. **Slots** ([`SlotArena`]): bounded tables with generation-checked
//!    keys, so a stale handle is rejected instead of aliasing a new entry.
//! 2. **Sessions** ([`SessionRegistry`], [`Session`]): the rooms the local
//!    peer is in, their flags and web session id.
//! 3. **Members** ([`RoomMember`]): who is in each room, their signaling
//!    state, address, connection and host hint.
//! 4. **Host migration records** ([`HostMigrationInfo`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Lobby (above)           ← drives tasks, correlates platform events
//!     ↕
//! Session layer (this)    ← rooms, members, signaling, migration state
//!     ↕
//! Protocol / transport    ← ids, snapshots, connection ids
//! ```

mod arena;
mod error;
mod member;
mod migration;
mod registry;
mod session;
mod signaling;

pub use arena::{SlotArena, SlotKey};
pub use error::SessionError;
pub use member::{MemberRole, RoomMember};
pub use migration::{HostMigrationInfo, MigrationState};
pub use registry::{RegistryConfig, SessionHandle, SessionRegistry, SignalingTimeout};
pub use session::{CreateFlags, DeadMember, Session, SessionFlags};
pub use signaling::{SignalingState, SignalingStatus};
