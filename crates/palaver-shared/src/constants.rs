/// Application name
pub const APP_NAME: &str = "Palaver";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum accepted wire frame size in bytes (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Cap of each dedup ledger id set.
pub const LEDGER_CAP: usize = 1000;

/// Number of most-recent ids kept when a ledger set is evicted.
pub const LEDGER_KEEP: usize = 500;

/// Per-session message cap of the fallback store.
pub const FALLBACK_SESSION_CAP: usize = 200;

/// Base reconnect delay in milliseconds.
pub const RECONNECT_BASE_MS: u64 = 3000;

/// Ceiling on a single reconnect delay in milliseconds (30 s).
pub const RECONNECT_CEILING_MS: u64 = 30_000;

/// Reconnect attempts before the connection manager goes terminal.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// WebSocket close code for a normal, user-initiated closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Lifetime of a spool-transport envelope file in milliseconds.
pub const SPOOL_ENVELOPE_TTL_MS: u64 = 100;

/// Poll period of the spool-transport watcher in milliseconds.
pub const SPOOL_POLL_MS: u64 = 50;
