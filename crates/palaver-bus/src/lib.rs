//! # palaver-bus
//!
//! Sibling-window broadcast bus.
//!
//! Windows of the same logged-in user stay consistent by exchanging
//! [`Envelope`]s over one of two transports, selected once at startup: an
//! in-process broadcast hub for windows sharing a process, or a shared spool
//! directory observed by polling for windows that do not. The publishing
//! window feeds its own envelope back into its local handler after a
//! deferred tick, except `NewMessage` envelopes, which the outbound path has
//! already applied.

pub mod bus;
pub mod companion;
pub mod envelope;
pub mod transport;

mod error;

pub use bus::BroadcastBus;
pub use companion::CompanionTable;
pub use envelope::{Envelope, EnvelopeKind, SourceRole};
pub use error::BusError;
pub use transport::{select_transport, ProcessHub, SpoolTransport, Transport, TransportKind};
