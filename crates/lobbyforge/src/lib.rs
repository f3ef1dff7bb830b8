//! # Lobbyforge
//!
//! Peer-to-peer game session orchestration on top of a hosted
//! matchmaking service.
//!
//! A [`Lobby`] turns the platform's asynchronous room, signaling and
//! web-session requests into a small set of session verbs (create, join,
//! search, update, delete, host migration and friends). Each verb starts a
//! task that the lobby advances once per tick and completes through a
//! callback, exactly once.
//!
//! The lobby itself is synchronous and single-writer. Drive it by hand
//! (call [`Lobby::tick`] and feed it events), or run it inside a
//! [`LobbyService`] and talk to it through a [`LobbyHandle`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lobbyforge::prelude::*;
//!
//! let (lobby, mut events) = Lobby::builder()
//!     .config(LobbyConfig::default())
//!     .platform(my_platform)
//!     .build()?;
//! let (service, handle, inbound) = LobbyService::spawn(lobby, TickConfig::with_rate(30));
//!
//! // The platform's callback thread forwards events:
//! // inbound.platform_event(event)?;
//!
//! let created = handle
//!     .create_session(vec![LocalUser(0)], CreateParams::default())
//!     .await?;
//! println!("share this: {}", created.id);
//! ```

mod config;
mod correlator;
mod create;
mod error;
mod events;
mod join;
mod lobby;
mod migration;
mod platform;
mod search;
mod service;
mod session_ops;
mod task;
mod user_data;

pub use config::{LobbyConfig, MAX_ADVERTISEMENT_LEN, MAX_TASKS};
pub use create::{CreateParams, SessionCreated};
pub use error::LobbyError;
pub use events::{LobbyEvent, SessionUser};
pub use join::SessionJoined;
pub use lobby::{Lobby, LobbyBuilder, LocalUser};
pub use platform::MatchmakingPlatform;
pub use search::{SearchParams, SearchResult};
pub use service::{Inbound, InboundSender, LobbyHandle, LobbyService};
pub use session_ops::RoomDetails;
pub use task::{Callback, StreamCallback, Streamed, TaskId};

pub use lobbyforge_protocol as protocol;
pub use lobbyforge_session as session;
pub use lobbyforge_tick as tick;
pub use lobbyforge_transport as transport;
pub use lobbyforge_world as world;

/// Installs a `tracing` subscriber that honours `RUST_LOG`, falling back
/// to `info`. Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// The types most games need.
pub mod prelude {
    pub use crate::{
        CreateParams, InboundSender, Lobby, LobbyConfig, LobbyError, LobbyEvent, LobbyHandle,
        LobbyService, LocalUser, MatchmakingPlatform, SearchParams, SearchResult, SessionCreated,
        SessionJoined, SessionUser, Streamed, TaskId,
    };
    pub use lobbyforge_protocol::{
        HostHint, PlatformEvent, SearchFilter, SessionId, SessionUserData, UserDataDescriptor,
    };
    pub use lobbyforge_session::{CreateFlags, SessionHandle};
    pub use lobbyforge_tick::TickConfig;
}
