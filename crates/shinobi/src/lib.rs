//! # Shinobi
//!
//! LAN multiplayer session layer: up to four players connect to one
//! authoritative host, exchange per-tick entity state, and share the host's
//! enemies and level transitions.
//!
//! The host runs the [`Registry`](shinobi_registry::Registry) and joins it
//! like everyone else; the game implements [`GameHooks`] and sees the
//! session only through those callbacks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shinobi::prelude::*;
//!
//! # async fn run() -> Result<(), ShinobiError> {
//! let host = HostSession::<MirrorWorld>::builder()
//!     .bind("0.0.0.0:5050")
//!     .nickname("Kai")
//!     .start(MirrorWorld::new())
//!     .await?;
//!
//! let ann = ClientSession::connect(
//!     ClientConfig::client(host.local_addr().to_string(), "Ann"),
//!     MirrorWorld::new(),
//! )
//! .await?;
//!
//! host.ready_up().await?;
//! ann.ready_up().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod host;
pub mod telemetry;

pub use error::ShinobiError;
pub use host::{HostBuilder, HostGame, HostSession};

pub use shinobi_client as client;
pub use shinobi_protocol as protocol;
pub use shinobi_registry as registry;
pub use shinobi_session as session;
pub use shinobi_tick as tick;
pub use shinobi_transport as transport;

/// Re-exports for the common case.
pub mod prelude {
    pub use crate::{HostBuilder, HostGame, HostSession, ShinobiError};
    pub use shinobi_client::{ClientConfig, ClientError, ClientSession, GameHooks};
    pub use shinobi_protocol::{ClientId, EntityId, EntitySnapshot, MapPayload, Roster};
    pub use shinobi_registry::{DEFAULT_PORT, Registry, RegistryConfig, RegistryHandle};
    pub use shinobi_session::{EntityWorld, MirrorWorld, Phase, PlayerState, Role, SlotTable};
    pub use shinobi_transport::DisconnectCause;
}
