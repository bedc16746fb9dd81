//! # palaver-shared
//!
//! Domain types, wire protocol frames, and the content-cipher collaborator
//! shared by every Palaver crate.
//!
//! The wire protocol is a pair of closed tagged enums ([`protocol::ClientFrame`]
//! and [`protocol::ServerFrame`]) serialized as a single JSON text payload per
//! socket message and validated at the network boundary before anything
//! reaches the router.

pub mod constants;
pub mod crypto;
pub mod protocol;
pub mod types;

mod error;

pub use error::{CryptoError, PalaverError, ProtocolError};
pub use types::{Message, MessageKind, Session, SessionKind};
