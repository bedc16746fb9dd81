//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so the client can start with zero
//! configuration against a local development server.

use std::fmt;
use std::path::PathBuf;

use palaver_shared::crypto::SymmetricKey;

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the chat server.
    /// Env: `PALAVER_SERVER_URL`
    /// Default: `ws://127.0.0.1:9090/ws`
    pub server_url: String,

    /// Already-issued identity token presented in the `Auth` frame.
    /// Env: `PALAVER_TOKEN`
    /// Default: `dev-token` (development only).
    pub token: String,

    /// Username stamped on authored messages.
    /// Env: `PALAVER_USERNAME`
    /// Default: `anonymous`
    pub username: String,

    /// Directory holding the SQLite database and the fallback blob.
    /// Env: `PALAVER_DATA_DIR`
    /// Default: the platform data dir (`ProjectDirs`), else `./palaver-data`.
    pub data_dir: PathBuf,

    /// Shared spool directory for the cross-process bus transport. When
    /// unset, siblings are assumed in-process and the native hub is used.
    /// Env: `PALAVER_SPOOL_DIR`
    /// Default: unset.
    pub spool_dir: Option<PathBuf>,

    /// Skip the primary store entirely and run on the fallback tier.
    /// Env: `PALAVER_FORCE_FALLBACK` (true/false)
    /// Default: `false`
    pub force_fallback: bool,

    /// Rooms to register on startup, comma-separated.
    /// Env: `PALAVER_ROOMS`
    /// Default: empty (sessions register lazily as traffic references them).
    pub rooms: Vec<String>,

    /// Symmetric content key, 64 hex chars. When set, authored messages are
    /// sealed before hitting the wire and opaque payloads are unsealed at
    /// the boundary.
    /// Env: `PALAVER_CONTENT_KEY`
    /// Default: unset (plaintext content).
    pub content_key: Option<SymmetricKey>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090/ws".to_string(),
            token: "dev-token".to_string(),
            username: "anonymous".to_string(),
            data_dir: default_data_dir(),
            spool_dir: None,
            force_fallback: false,
            rooms: Vec::new(),
            content_key: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("data_dir", &self.data_dir)
            .field("spool_dir", &self.spool_dir)
            .field("force_fallback", &self.force_fallback)
            .field("rooms", &self.rooms)
            .field("content_key", &self.content_key.map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("PALAVER_SERVER_URL") {
            config.server_url = url;
        }

        if let Ok(token) = std::env::var("PALAVER_TOKEN") {
            config.token = token;
        }

        if let Ok(name) = std::env::var("PALAVER_USERNAME") {
            config.username = name;
        }

        if let Ok(dir) = std::env::var("PALAVER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("PALAVER_SPOOL_DIR") {
            if !dir.is_empty() {
                config.spool_dir = Some(PathBuf::from(dir));
            }
        }

        if let Ok(val) = std::env::var("PALAVER_FORCE_FALLBACK") {
            config.force_fallback = val == "true" || val == "1";
        }

        if let Ok(rooms) = std::env::var("PALAVER_ROOMS") {
            config.rooms = parse_rooms(&rooms);
        }

        if let Ok(hex_key) = std::env::var("PALAVER_CONTENT_KEY") {
            match parse_hex_key(&hex_key) {
                Ok(key) => config.content_key = Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid PALAVER_CONTENT_KEY, running plaintext");
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// SQLite database file inside the data dir.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("palaver.db")
    }

    /// Fallback blob file inside the data dir.
    pub fn fallback_path(&self) -> PathBuf {
        self.data_dir.join("fallback.json")
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "palaver", "palaver")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./palaver-data"))
}

fn parse_rooms(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|room| !room.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a 64-character hex string into a 32-byte key.
fn parse_hex_key(raw: &str) -> Result<SymmetricKey, String> {
    let raw = raw.trim();
    let bytes = hex::decode(raw).map_err(|e| e.to_string())?;
    let key: SymmetricKey = bytes
        .try_into()
        .map_err(|_| format!("expected 32 key bytes, got {}", raw.len() / 2))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rooms_list_trims_and_skips_empties() {
        assert_eq!(parse_rooms("lobby, dev,,  random "), ["lobby", "dev", "random"]);
        assert!(parse_rooms("").is_empty());
        assert!(parse_rooms(" , ,").is_empty());
    }

    #[test]
    fn hex_key_round_trip() {
        let key = parse_hex_key(&"ab".repeat(32)).unwrap();
        assert_eq!(key, [0xab_u8; 32]);
    }

    #[test]
    fn short_or_garbage_key_is_rejected() {
        assert!(parse_hex_key("abcd").is_err());
        assert!(parse_hex_key(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn debug_never_prints_the_key() {
        let config = ClientConfig {
            content_key: Some([7u8; 32]),
            ..ClientConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("[7"));
    }
}
