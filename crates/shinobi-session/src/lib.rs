//! Session layer for Shinobi: the shared vocabulary of host and clients.
//!
//! - [`Role`] and [`Phase`] with the transition rules of
//!   [`SessionState`].
//! - [`SlotTable`]: four seats of optional [`PlayerState`], kept contiguous
//!   when players leave, plus the launch rule (host only, everyone ready).
//! - [`sync`]: per-tick batch assembly and application over any
//!   [`EntityWorld`], with [`MirrorWorld`] as a ready-made store.
//!
//! Nothing here touches the network. The registry and the client session
//! both build on these types.

mod error;
mod lobby;
mod state;
pub mod sync;

pub use error::SessionError;
pub use lobby::{MAX_SLOTS, PlayerState, Shift, SlotTable};
pub use state::{Phase, Role, SessionState};
pub use sync::{EntityWorld, MirrorWorld, SyncOutcome, apply_batch, assemble_batch};
