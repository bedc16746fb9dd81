//! Companion (child) window tracking.
//!
//! A window may open one secondary window per session. The companion never
//! connects to the network itself: it announces itself with a `ChildReady`
//! envelope, the opener records a non-owning handle and replies with a
//! `SyncMessages` snapshot, and thereafter pushes `NewMessage` /
//! `SyncMessages` envelopes addressed by session id. Handles are weak:
//! pruned on every failed push and on every scheduled sweep, never keeping
//! the companion alive.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::envelope::Envelope;

/// Non-owning reference to a companion window's delivery channel.
pub type CompanionHandle = mpsc::Sender<Envelope>;

/// The opener's table of live companion windows, keyed by session.
#[derive(Default)]
pub struct CompanionTable {
    handles: HashMap<String, CompanionHandle>,
}

impl CompanionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a companion that completed the `ChildReady` handshake.
    /// A new companion for the same session replaces the old handle.
    pub fn register(&mut self, session_id: impl Into<String>, handle: CompanionHandle) {
        let session_id = session_id.into();
        debug!(session = %session_id, "companion registered");
        self.handles.insert(session_id, handle);
    }

    /// Push an envelope to the companion bound to `session_id`, if any.
    ///
    /// A failed push means the companion is gone; its handle is pruned on
    /// the spot. Returns whether the envelope was accepted.
    pub fn push(&mut self, session_id: &str, envelope: Envelope) -> bool {
        let handle = match self.handles.get(session_id) {
            Some(handle) => handle,
            None => return false,
        };

        match handle.try_send(envelope) {
            Ok(()) => true,
            Err(_) => {
                debug!(session = %session_id, "companion unreachable; pruning");
                self.handles.remove(session_id);
                false
            }
        }
    }

    /// Drop handles whose windows have closed. Run on a schedule.
    pub fn sweep(&mut self) {
        let before = self.handles.len();
        self.handles.retain(|_, handle| !handle.is_closed());
        let pruned = before - self.handles.len();
        if pruned > 0 {
            debug!(pruned, "swept closed companion windows");
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
