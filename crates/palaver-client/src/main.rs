//! # palaver-client
//!
//! Headless chat client binary wiring the engine together:
//! - **Two-tier local store** (SQLite primary, JSON fallback) for offline
//!   history
//! - **WebSocket connection manager** with capped-backoff reconnects
//! - **Sibling-window broadcast bus** over an in-process hub or a shared
//!   spool directory
//! - **Message router and history sync** keeping every window's view
//!   converged on one stored copy per message
//!
//! Input comes from stdin (`room text`, `/join room`, `/delete room id`,
//! `/quit`); output is log lines. No rendering layer.

mod bridge;
mod config;

use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use palaver_bus::{
    select_transport, BroadcastBus, ProcessHub, SourceRole, SpoolTransport, Transport,
    TransportKind,
};
use palaver_engine::ClientContext;
use palaver_net::{spawn_socket, SocketConfig};
use palaver_store::{LocalStore, StoreConfig};

use crate::bridge::{broadcast_ledger_hook, parse_line, Bridge, TraceSink};
use crate::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,palaver_client=debug,palaver_engine=debug,palaver_net=debug")
        }))
        .init();

    info!("Starting Palaver client v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the local store and build the engine context
    // -----------------------------------------------------------------------
    std::fs::create_dir_all(&config.data_dir)?;
    let store = LocalStore::open(&StoreConfig {
        db_path: config.db_path(),
        fallback_path: config.fallback_path(),
        force_fallback: config.force_fallback,
    });
    if store.is_degraded() {
        warn!("running on the fallback store tier");
    }
    let ctx = ClientContext::new(store, Arc::new(TraceSink));

    // -----------------------------------------------------------------------
    // 4. Attach to the broadcast bus
    // -----------------------------------------------------------------------
    // The hub must outlive the bus handles attached to it.
    let hub = ProcessHub::new(64);
    let transport = match select_transport(config.spool_dir.is_none()) {
        TransportKind::Process => hub.attach(),
        TransportKind::Spool => {
            let dir = config
                .spool_dir
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("spool transport selected without a spool dir"))?;
            Transport::Spool(SpoolTransport::open(dir)?)
        }
    };
    let (bus, envelope_rx) = BroadcastBus::new(transport, SourceRole::Main, broadcast_ledger_hook());

    // -----------------------------------------------------------------------
    // 5. Spawn the socket task
    // -----------------------------------------------------------------------
    let (cmd_tx, notif_rx) = spawn_socket(SocketConfig::new(
        config.server_url.clone(),
        config.token.clone(),
    ));

    // -----------------------------------------------------------------------
    // 6. Read commands from stdin
    // -----------------------------------------------------------------------
    let (command_tx, command_rx) = mpsc::channel(16);
    // Keep the channel open past stdin EOF so the bridge runs until logout.
    let _command_keepalive = command_tx.clone();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(command) = parse_line(&line) {
                if command_tx.send(command).await.is_err() {
                    return;
                }
            }
        }
    });

    // -----------------------------------------------------------------------
    // 7. Run the bridge until logout or terminal failure
    // -----------------------------------------------------------------------
    let mut bridge = Bridge::new(
        ctx,
        bus,
        cmd_tx,
        config.username.clone(),
        config.content_key,
    );
    bridge.register_rooms(&config.rooms);
    bridge.run(notif_rx, envelope_rx, command_rx).await;

    info!("client stopped");
    Ok(())
}
