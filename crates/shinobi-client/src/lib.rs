//! Client session for Shinobi.
//!
//! Every participant runs a [`ClientSession`], the host included: it
//! connects to the registry, answers the handshake, keeps its own copy of
//! the lobby, and translates protocol events into calls on the game's
//! [`GameHooks`].
//!
//! ```text
//! connect → AwaitingSlot → Lobby → (ready_up, launch, `*[START GAME]` echo) → Launched → level_loaded → Running
//! ```
//!
//! Entity batches flow only after launch: the send task asks
//! [`assemble_batch`](shinobi_session::assemble_batch) for one per tick and
//! the receive task hands incoming ones to
//! [`apply_batch`](shinobi_session::apply_batch).

mod config;
mod error;
mod hooks;
mod session;

pub use config::ClientConfig;
pub use error::ClientError;
pub use hooks::GameHooks;
pub use session::ClientSession;
