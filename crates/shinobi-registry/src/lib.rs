//! Host-side session registry for Shinobi.
//!
//! The registry owns the four seats of a LAN session. It handshakes every
//! incoming peer, seats it in the first free slot, relays control and
//! entity traffic between seats, and re-indexes the remaining seats when
//! somebody leaves.
//!
//! # Key types
//!
//! - [`Registry`]: binds the listener and runs the accept loop
//! - [`RegistryHandle`]: inspect or shut down a running registry
//! - [`SeatTable`]: seat bookkeeping, free of I/O
//! - [`RegistryConfig`]: bind address, slot count, timeouts
//!
//! The host's departure ends the session for everyone.

mod config;
mod error;
mod handler;
mod registry;
mod table;

pub use config::{DEFAULT_PORT, RegistryConfig};
pub use error::RegistryError;
pub use registry::{Registry, RegistryHandle};
pub use table::{Admission, Departure, SeatTable};
