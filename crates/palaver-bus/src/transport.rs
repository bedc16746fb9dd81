//! Bus transports.
//!
//! Two ways to reach sibling windows, chosen once at startup and never
//! switched at runtime: an in-process broadcast hub ([`ProcessHub`]) when the
//! siblings share a process, and a shared spool directory
//! ([`SpoolTransport`]) when they do not. A spool envelope lives as a file
//! for ~100 ms and siblings observe the directory by short-interval polling.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use palaver_shared::constants::{SPOOL_ENVELOPE_TTL_MS, SPOOL_POLL_MS};

use crate::envelope::Envelope;
use crate::error::Result;

/// Which transport a window should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Process,
    Spool,
}

/// Pure startup selection: the native in-process primitive when available,
/// the spool directory otherwise. There is no runtime fallback switching.
pub fn select_transport(native_available: bool) -> TransportKind {
    if native_available {
        TransportKind::Process
    } else {
        TransportKind::Spool
    }
}

/// A transport handle attached to one window.
pub enum Transport {
    Process(ProcessTransport),
    Spool(SpoolTransport),
}

impl Transport {
    /// Send an envelope to every sibling (the sender's own echo is filtered
    /// by the bus layer, not here).
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        match self {
            Self::Process(t) => t.send(envelope),
            Self::Spool(t) => t.send(envelope).await,
        }
    }

    /// Stream of envelopes observed on the transport.
    pub fn subscribe(&self) -> mpsc::Receiver<Envelope> {
        match self {
            Self::Process(t) => t.subscribe(),
            Self::Spool(t) => t.subscribe(),
        }
    }
}

// ---------------------------------------------------------------------------
// In-process hub
// ---------------------------------------------------------------------------

/// Shared hub for windows living in one process.
#[derive(Clone)]
pub struct ProcessHub {
    tx: broadcast::Sender<Envelope>,
}

impl ProcessHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Attach a window to the hub.
    pub fn attach(&self) -> Transport {
        Transport::Process(ProcessTransport {
            tx: self.tx.clone(),
        })
    }
}

pub struct ProcessTransport {
    tx: broadcast::Sender<Envelope>,
}

impl ProcessTransport {
    fn send(&self, envelope: &Envelope) -> Result<()> {
        // No receivers is fine: the publisher may be the only window.
        let _ = self.tx.send(envelope.clone());
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<Envelope> {
        let mut rx = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::channel(64);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if out_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "bus subscriber lagged; envelopes dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        out_rx
    }
}

// ---------------------------------------------------------------------------
// Spool directory
// ---------------------------------------------------------------------------

/// Shared-directory transport for windows in separate processes.
pub struct SpoolTransport {
    dir: PathBuf,
}

impl SpoolTransport {
    /// Attach to (and create if needed) the spool directory.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let path = self.dir.join(format!("env-{}.json", envelope.unique_id));
        let text = serde_json::to_string(envelope)?;
        tokio::fs::write(&path, text).await?;

        debug!(path = %path.display(), "spooled envelope");

        // The file only needs to outlive one sibling poll period.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(SPOOL_ENVELOPE_TTL_MS)).await;
            let _ = tokio::fs::remove_file(&path).await;
        });

        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<Envelope> {
        let dir = self.dir.clone();
        let (out_tx, out_rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut consumed: HashSet<String> = HashSet::new();
            let mut tick = tokio::time::interval(Duration::from_millis(SPOOL_POLL_MS));

            loop {
                tick.tick().await;
                if out_tx.is_closed() {
                    break;
                }

                let mut present: HashSet<String> = HashSet::new();
                let entries = match std::fs::read_dir(&dir) {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(error = %e, "spool directory unreadable");
                        continue;
                    }
                };

                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if !name.starts_with("env-") || !name.ends_with(".json") {
                        continue;
                    }
                    present.insert(name.clone());
                    if consumed.contains(&name) {
                        continue;
                    }
                    consumed.insert(name);

                    let envelope = std::fs::read_to_string(entry.path())
                        .ok()
                        .and_then(|text| serde_json::from_str::<Envelope>(&text).ok());
                    match envelope {
                        Some(envelope) => {
                            if out_tx.send(envelope).await.is_err() {
                                return;
                            }
                        }
                        None => warn!(file = %entry.path().display(), "unreadable spool envelope"),
                    }
                }

                // Once a file is gone it can never be re-observed, so its
                // consumed marker can go too.
                consumed.retain(|name| present.contains(name));
            }
        });

        out_rx
    }
}
