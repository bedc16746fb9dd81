//! # palaver-net
//!
//! WebSocket connection manager.
//!
//! One tokio task owns the socket for its whole lifecycle: connect,
//! authenticate, pump frames, and recover abnormal closes with capped
//! exponential backoff. External code talks to it through typed command and
//! notification channels.

pub mod backoff;
pub mod socket;

mod error;

pub use backoff::{reconnect_delay, ReconnectState};
pub use error::NetError;
pub use socket::{spawn_socket, ConnState, SocketCommand, SocketConfig, SocketNotification};
