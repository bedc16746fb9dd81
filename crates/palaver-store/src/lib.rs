//! # palaver-store
//!
//! Two-tier local persistence for Palaver.
//!
//! The primary backend is a transactional SQLite database ([`Database`])
//! keyed by message id with secondary indexes on session, sender, time,
//! kind, NSFW flag, and conversation id. The fallback backend
//! ([`FallbackStore`]) is a flat JSON blob capped at 200 messages per
//! session, used for the remainder of the process once the primary fails.
//! [`LocalStore`] is the selected-once facade the engine talks to.

pub mod database;
pub mod fallback;
pub mod messages;
pub mod migrations;
pub mod store;
pub mod watermarks;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use fallback::FallbackStore;
pub use store::{choose_backend, BackendChoice, LocalStore, StoreConfig};
