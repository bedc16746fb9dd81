//! The engine's only upward contract.

/// Callbacks into the (out-of-scope) rendering layer.
pub trait ViewSink: Send + Sync {
    /// The visible session's log changed and should be re-rendered.
    fn session_messages_changed(&self, session_id: &str);

    /// A message arrived for a session that is not currently visible;
    /// surface a passive notification.
    fn session_notify(&self, session_id: &str, preview: &str);
}

/// Sink that drops everything; for tests and headless runs.
#[derive(Debug, Default)]
pub struct NullSink;

impl ViewSink for NullSink {
    fn session_messages_changed(&self, _session_id: &str) {}
    fn session_notify(&self, _session_id: &str, _preview: &str) {}
}
